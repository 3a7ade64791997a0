//! Existence-gated, fault-isolated generation of the report figures.
//!
//! Every task is checked against the bundle first; a task whose inputs are
//! missing is skipped, a task whose render or save faults is recorded as
//! failed, and the run always continues with the next task. Figures are
//! drawn into a temporary file next to their destination and only renamed
//! into place once saving completed, so a failed task leaves no file behind.

use std::any::Any;
use std::fs::create_dir_all;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{FigureSize, ReportConfig};
use crate::helper_functions::{sanitize_file_token, write_json_pretty};
use crate::models::{io_err, Bundle, ReportError, ReportResult};
use crate::render::{Figure, ForestStyle, Renderer};

pub const FILTER_KEY: &str = "filter";
pub const TRAINING_KEY: &str = "training_bundle";
pub const VALIDATION_KEY: &str = "validation_bundle";

pub const TRAINING_DIR: &str = "training_plots";
pub const VALIDATION_DIR: &str = "validation_plots";
pub const FOREST_DIR: &str = "forest_plots";
pub const SUMMARY_FILE: &str = "report_summary.json";
const FOREST_BATCH: &str = "forest_plots";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    SummaryRoc { meta_key: &'static str },
    Violin { cohort_key: &'static str },
    Roc { cohort_key: &'static str, title: String },
}

/// One statically declared figure.
#[derive(Debug, Clone)]
pub struct PlotTask {
    pub name: String,
    pub required: Vec<&'static str>,
    pub call: RenderCall,
    pub output: PathBuf,
    pub size: FigureSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Skipped,
    Failed,
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub status: TaskStatus,
    /// skip reason or captured error
    pub detail: Option<String>,
    pub output: Option<PathBuf>,
}

impl TaskOutcome {
    fn succeeded(name: impl Into<String>, output: &Path) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Succeeded,
            detail: None,
            output: Some(output.to_path_buf()),
        }
    }

    fn with_detail(name: impl Into<String>, status: TaskStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: Some(detail.into()),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub nothing_to_do: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub outcomes: Vec<TaskOutcome>,
    pub counts: StatusCounts,
}

impl ReportSummary {
    pub fn from_outcomes(outcomes: Vec<TaskOutcome>) -> Self {
        let mut counts = StatusCounts::default();
        for o in &outcomes {
            match o.status {
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::NothingToDo => counts.nothing_to_do += 1,
            }
        }
        Self { outcomes, counts }
    }

    #[cfg(test)]
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// The fixed battery of ROC and violin figures, in run order.
pub fn static_tasks(config: &ReportConfig) -> Vec<PlotTask> {
    let root = &config.output_root;
    let ext = config.format.extension();
    let file = |dir: &str, stem: &str| root.join(dir).join(format!("{}.{}", stem, ext));

    let summary_roc = |stem: &str, dir: &str, meta_key: &'static str| PlotTask {
        name: stem.to_string(),
        required: vec![meta_key, FILTER_KEY],
        call: RenderCall::SummaryRoc { meta_key },
        output: file(dir, stem),
        size: config.roc_size,
    };
    let violin = |dir: &str, cohort_key: &'static str| {
        let stem = format!("{}_violinplot", cohort_key);
        PlotTask {
            required: vec![FILTER_KEY, cohort_key],
            call: RenderCall::Violin { cohort_key },
            output: file(dir, &stem),
            name: stem,
            size: config.violin_size,
        }
    };
    let roc = |dir: &str, cohort_key: &'static str| {
        let stem = format!("{}_roc_curve", cohort_key);
        PlotTask {
            required: vec![FILTER_KEY, cohort_key],
            call: RenderCall::Roc {
                cohort_key,
                title: format!("{} ROC", cohort_key),
            },
            output: file(dir, &stem),
            name: stem,
            size: config.roc_size,
        }
    };

    vec![
        summary_roc("training_roc_curve", TRAINING_DIR, TRAINING_KEY),
        violin(TRAINING_DIR, "GSE135222"),
        violin(TRAINING_DIR, "POPLAR"),
        violin(TRAINING_DIR, "OKA_different_type"),
        summary_roc("validation_roc_curve", VALIDATION_DIR, VALIDATION_KEY),
        violin(VALIDATION_DIR, "OKA"),
        violin(VALIDATION_DIR, "GSE111414"),
        violin(VALIDATION_DIR, "WHTJ2"),
        roc(VALIDATION_DIR, "WHTJ2"),
    ]
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "renderer panicked".to_string()
    }
}

/// Runs `f`, turning a panic inside it into a render error.
fn isolate<T>(f: impl FnOnce() -> ReportResult<T>) -> ReportResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ReportError::Render(format!(
            "panic: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Saves `figure` to `path` through a scoped temporary file in the same directory.
///
/// The temporary file is removed when it goes out of scope unless the save
/// completed and it was renamed over `path`.
pub fn persist_figure<F: Figure>(figure: &F, path: &Path, size: FigureSize) -> ReportResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir).map_err(io_err(dir))?;

    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut builder = tempfile::Builder::new();
    builder.prefix(".partial-").suffix(&suffix);
    // staged files default to 0600; figures get the same mode as the summary
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    let staged = builder.tempfile_in(dir).map_err(io_err(dir))?;

    figure.save(staged.path(), size.pixels())?;
    staged
        .persist(path)
        .map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

fn render_task<R: Renderer>(
    task: &PlotTask,
    bundle: &Bundle,
    renderer: &R,
    config: &ReportConfig,
) -> ReportResult<R::Output> {
    let filter = bundle.filter(FILTER_KEY)?;
    match &task.call {
        RenderCall::SummaryRoc { meta_key } => {
            let meta = bundle.meta_analysis(meta_key)?;
            renderer.summary_roc(meta, filter, config.bootstrap_reps)
        }
        RenderCall::Violin { cohort_key } => {
            let cohort = bundle.cohort(cohort_key)?;
            renderer.violin(filter, cohort, &config.label_column)
        }
        RenderCall::Roc { cohort_key, title } => {
            let cohort = bundle.cohort(cohort_key)?;
            renderer.roc(filter, cohort, &config.label_column, title, config.bootstrap_reps)
        }
    }
}

pub fn run_task<R: Renderer>(
    task: &PlotTask,
    bundle: &Bundle,
    renderer: &R,
    config: &ReportConfig,
) -> TaskOutcome {
    let missing = bundle.missing_keys(&task.required);
    if !missing.is_empty() {
        let reason = ReportError::MissingInput { keys: missing }.to_string();
        warn!("Skipping {}: {}", task.name, reason);
        return TaskOutcome::with_detail(&task.name, TaskStatus::Skipped, reason);
    }

    info!("Rendering {}", task.name);
    let result = isolate(|| {
        let figure = render_task(task, bundle, renderer, config)?;
        persist_figure(&figure, &task.output, task.size)
    });

    match result {
        Ok(()) => {
            info!("{} saved to {}", task.name, task.output.display());
            TaskOutcome::succeeded(&task.name, &task.output)
        }
        Err(e) => {
            error!("{} failed: {}", task.name, e);
            TaskOutcome::with_detail(&task.name, TaskStatus::Failed, e.to_string())
        }
    }
}

pub fn forest_plot_path(output_root: &Path, gene: &str, ext: &str) -> PathBuf {
    output_root
        .join(FOREST_DIR)
        .join(format!("{}_forest_plot.{}", sanitize_file_token(gene), ext))
}

/// One forest plot per gene of the filter, positive genes first. Duplicates are plotted again.
pub fn run_forest_batch<R: Renderer>(
    bundle: &Bundle,
    renderer: &R,
    config: &ReportConfig,
    style: &ForestStyle,
) -> Vec<TaskOutcome> {
    let missing = bundle.missing_keys(&[FILTER_KEY, TRAINING_KEY]);
    if !missing.is_empty() {
        let reason = ReportError::MissingInput { keys: missing }.to_string();
        warn!("Skipping forest plots: {}", reason);
        return vec![TaskOutcome::with_detail(FOREST_BATCH, TaskStatus::Skipped, reason)];
    }

    let (filter, meta) = match (bundle.filter(FILTER_KEY), bundle.meta_analysis(TRAINING_KEY)) {
        (Ok(filter), Ok(meta)) => (filter, meta),
        (Err(e), _) | (_, Err(e)) => {
            error!("Forest plots failed: {}", e);
            return vec![TaskOutcome::with_detail(FOREST_BATCH, TaskStatus::Failed, e.to_string())];
        }
    };

    let genes = filter.all_genes();
    if genes.is_empty() {
        info!("No genes in the filter, no forest plots to draw");
        return vec![TaskOutcome::with_detail(
            FOREST_BATCH,
            TaskStatus::NothingToDo,
            "filter has no positive or negative genes",
        )];
    }

    info!(
        "Drawing {} forest plots for filter {}",
        genes.len(),
        filter.name.as_deref().unwrap_or(FILTER_KEY)
    );
    let ext = config.format.extension();
    genes
        .into_iter()
        .map(|gene| {
            let name = format!("forest_plot:{}", gene);
            let path = forest_plot_path(&config.output_root, gene, ext);
            debug!("{} -> {}", gene, path.display());

            let result = isolate(|| match renderer.forest(gene, meta, style)? {
                Some(figure) => persist_figure(&figure, &path, config.forest_size).map(|_| true),
                None => Ok(false),
            });

            match result {
                Ok(true) => TaskOutcome::succeeded(name, &path),
                Ok(false) => {
                    warn!("No effect sizes for {} in {}", gene, meta.name);
                    TaskOutcome::with_detail(
                        name,
                        TaskStatus::Skipped,
                        format!("no effect sizes for {} in {}", gene, meta.name),
                    )
                }
                Err(e) => {
                    error!("Forest plot for {} failed: {}", gene, e);
                    TaskOutcome::with_detail(name, TaskStatus::Failed, e.to_string())
                }
            }
        })
        .collect()
}

/// Runs every static task and the forest-plot batch. Only an uncreatable output root is fatal.
pub fn run_report<R: Renderer>(
    bundle: &Bundle,
    renderer: &R,
    config: &ReportConfig,
) -> ReportResult<ReportSummary> {
    let root = &config.output_root;
    create_dir_all(root).map_err(io_err(root))?;
    info!(
        "Generating report into {} from {} bundle entries",
        root.display(),
        bundle.len()
    );

    let mut outcomes: Vec<TaskOutcome> = static_tasks(config)
        .iter()
        .map(|task| run_task(task, bundle, renderer, config))
        .collect();
    outcomes.extend(run_forest_batch(bundle, renderer, config, &ForestStyle::default()));

    let summary = ReportSummary::from_outcomes(outcomes);
    let c = summary.counts;
    info!(
        "Report finished: {} succeeded, {} skipped, {} failed, {} with nothing to do",
        c.succeeded, c.skipped, c.failed, c.nothing_to_do
    );

    let summary_path = root.join(SUMMARY_FILE);
    if let Err(e) = write_json_pretty(&summary_path, &summary) {
        warn!("Could not write {}: {}", summary_path.display(), e);
    }
    Ok(summary)
}
