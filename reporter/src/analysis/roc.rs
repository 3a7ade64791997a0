use std::cmp::Ordering;

use plotters::coord::Shift;
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info, warn};

use crate::analysis::signature::{labelled_scores, LabelledScores};
use crate::analysis::{palette_colour, quantile_sorted};
use crate::models::{render_err, Cohort, GeneFilter, MetaAnalysis, ReportError, ReportResult};

/// FPR/TPR points of one ROC curve and its trapezoidal AUC.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fprs: Vec<f64>,
    pub tprs: Vec<f64>,
    pub auc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AucInterval {
    pub auc: f64,
    pub se: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct CohortRoc {
    pub name: String,
    pub curve: RocCurve,
    pub interval: AucInterval,
    pub n_cases: usize,
    pub n_controls: usize,
}

/// A single-cohort ROC figure.
#[derive(Debug, Clone)]
pub struct RocFigure {
    pub title: String,
    pub cohort: CohortRoc,
}

/// Per-cohort ROC curves of a meta-analysis with the pooled AUC.
#[derive(Debug, Clone)]
pub struct SummaryRocFigure {
    pub title: String,
    pub cohorts: Vec<CohortRoc>,
    pub pooled: AucInterval,
}

// Lower bound on AUC standard errors; perfectly separated cohorts otherwise get infinite weight.
const MIN_AUC_SE: f64 = 1e-4;

/// ROC points for `scores` against boolean `labels`, higher score = case.
///
/// Tied scores move along the curve together, so the AUC equals the
/// Mann–Whitney estimate with ties counted as one half.
pub fn compute_roc(scores: &[f64], labels: &[bool]) -> ReportResult<RocCurve> {
    let positive_count = labels.iter().filter(|&&l| l).count();
    let negative_count = labels.len() - positive_count;
    if positive_count == 0 || negative_count == 0 {
        return Err(ReportError::Render(format!(
            "ROC needs both classes (cases = {}, controls = {})",
            positive_count, negative_count
        )));
    }

    let mut paired: Vec<(f64, bool)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    paired.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut fprs = vec![0.0];
    let mut tprs = vec![0.0];
    let (mut tp, mut fp) = (0usize, 0usize);

    let mut i = 0;
    while i < paired.len() {
        let threshold = paired[i].0;
        while i < paired.len() && paired[i].0 == threshold {
            if paired[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        fprs.push(fp as f64 / negative_count as f64);
        tprs.push(tp as f64 / positive_count as f64);
    }

    let auc = calculate_auc(&fprs, &tprs);
    Ok(RocCurve { fprs, tprs, auc })
}

/// Area under the ROC curve by the trapezoidal rule.
fn calculate_auc(fpr: &[f64], tpr: &[f64]) -> f64 {
    if fpr.len() != tpr.len() || fpr.len() < 2 {
        return 0.0;
    }

    let mut auc = 0.0;
    for i in 1..fpr.len() {
        let width = fpr[i] - fpr[i - 1];
        let height = (tpr[i] + tpr[i - 1]) / 2.0;
        auc += width * height;
    }
    auc
}

fn mann_whitney_auc(cases: &[f64], controls: &[f64]) -> f64 {
    let mut wins = 0.0;
    for &c in cases {
        for &k in controls {
            if c > k {
                wins += 1.0;
            } else if c == k {
                wins += 0.5;
            }
        }
    }
    wins / (cases.len() * controls.len()) as f64
}

fn hanley_mcneil_se(auc: f64, n_cases: usize, n_controls: usize) -> f64 {
    let (n1, n2) = (n_cases as f64, n_controls as f64);
    let q1 = auc / (2.0 - auc);
    let q2 = 2.0 * auc * auc / (1.0 + auc);
    let var = (auc * (1.0 - auc) + (n1 - 1.0) * (q1 - auc * auc) + (n2 - 1.0) * (q2 - auc * auc))
        / (n1 * n2);
    var.max(0.0).sqrt()
}

/// Percentile bootstrap (2.5 / 97.5) of the AUC, resampling cases and controls separately.
///
/// With fewer than two replicates the Hanley–McNeil standard error and a normal interval are used.
pub fn bootstrap_auc(
    scores: &LabelledScores,
    reps: usize,
    rng: &mut StdRng,
) -> ReportResult<AucInterval> {
    let (cases, controls) = (&scores.cases, &scores.controls);
    if cases.is_empty() || controls.is_empty() {
        return Err(ReportError::Render("AUC needs both cases and controls".into()));
    }
    let auc = mann_whitney_auc(cases, controls);

    if reps < 2 {
        let se = hanley_mcneil_se(auc, cases.len(), controls.len());
        let z = normal_quantile(0.975)?;
        return Ok(AucInterval {
            auc,
            se,
            lower: (auc - z * se).max(0.0),
            upper: (auc + z * se).min(1.0),
        });
    }

    let mut boot = Vec::with_capacity(reps);
    let mut case_draw = vec![0.0; cases.len()];
    let mut control_draw = vec![0.0; controls.len()];
    for _ in 0..reps {
        for slot in case_draw.iter_mut() {
            *slot = cases[rng.gen_range(0..cases.len())];
        }
        for slot in control_draw.iter_mut() {
            *slot = controls[rng.gen_range(0..controls.len())];
        }
        boot.push(mann_whitney_auc(&case_draw, &control_draw));
    }

    let mean = boot.iter().sum::<f64>() / reps as f64;
    let var = boot.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / (reps - 1) as f64;
    boot.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    Ok(AucInterval {
        auc,
        se: var.sqrt(),
        lower: quantile_sorted(&boot, 0.025),
        upper: quantile_sorted(&boot, 0.975),
    })
}

pub(crate) fn normal_quantile(p: f64) -> ReportResult<f64> {
    let normal = Normal::new(0.0, 1.0).map_err(render_err)?;
    Ok(normal.inverse_cdf(p))
}

pub fn cohort_roc(
    filter: &GeneFilter,
    cohort: &Cohort,
    label_column: &str,
    reps: usize,
    rng: &mut StdRng,
) -> ReportResult<CohortRoc> {
    let split = labelled_scores(filter, cohort, label_column)?;
    let (scores, labels) = split.scores_and_labels();
    let curve = compute_roc(&scores, &labels)?;
    let interval = bootstrap_auc(&split, reps, rng)?;
    debug!(
        "{}: AUC = {:.3} [{:.3}, {:.3}]",
        cohort.name, interval.auc, interval.lower, interval.upper
    );
    Ok(CohortRoc {
        name: cohort.name.clone(),
        curve,
        interval,
        n_cases: split.cases.len(),
        n_controls: split.controls.len(),
    })
}

/// Inverse-variance pooled AUC over cohorts.
pub fn pool_auc(cohorts: &[CohortRoc]) -> ReportResult<AucInterval> {
    if cohorts.is_empty() {
        return Err(ReportError::Render("no cohort produced a ROC curve".into()));
    }
    let (mut sum_w, mut sum_wa) = (0.0, 0.0);
    for c in cohorts {
        let se = c.interval.se.max(MIN_AUC_SE);
        let w = 1.0 / (se * se);
        sum_w += w;
        sum_wa += w * c.interval.auc;
    }
    let auc = sum_wa / sum_w;
    let se = (1.0 / sum_w).sqrt();
    let z = normal_quantile(0.975)?;
    Ok(AucInterval {
        auc,
        se,
        lower: (auc - z * se).max(0.0),
        upper: (auc + z * se).min(1.0),
    })
}

pub fn summary_roc(
    meta: &MetaAnalysis,
    filter: &GeneFilter,
    reps: usize,
    seed: u64,
) -> ReportResult<SummaryRocFigure> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cohorts = Vec::with_capacity(meta.cohorts.len());
    for cohort in &meta.cohorts {
        match cohort_roc(filter, cohort, &meta.label_column, reps, &mut rng) {
            Ok(roc) => cohorts.push(roc),
            Err(e) => warn!("Skipping {} in summary ROC of {}: {}", cohort.name, meta.name, e),
        }
    }
    let pooled = pool_auc(&cohorts)?;
    info!(
        "Summary ROC for {}: pooled AUC = {:.3} over {} cohorts",
        meta.name,
        pooled.auc,
        cohorts.len()
    );
    Ok(SummaryRocFigure {
        title: format!("{}: summary ROC", meta.name),
        cohorts,
        pooled,
    })
}

// ───────────────────────────────── drawing ─────────────────────────────────

fn draw_roc_axes<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    caption: &str,
    curves: &[(String, &RocCurve, RGBColor)],
) -> ReportResult<()> {
    let caption_font = ("sans-serif", 24);
    let label_font = ("sans-serif", 16);

    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(root)
        .caption(caption, caption_font)
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..1.0, 0.0..1.0)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .label_style(label_font)
        .draw()
        .map_err(render_err)?;

    for (label, curve, colour) in curves {
        let colour = *colour;
        chart
            .draw_series(LineSeries::new(
                curve.fprs.iter().zip(curve.tprs.iter()).map(|(&x, &y)| (x, y)),
                colour.stroke_width(3),
            ))
            .map_err(render_err)?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], colour.stroke_width(3)));
    }

    // random baseline last so its legend entry comes last
    chart
        .draw_series(LineSeries::new(
            vec![(0.0, 0.0), (1.0, 1.0)],
            BLACK.mix(0.2).stroke_width(2),
        ))
        .map_err(render_err)?
        .label("Random (AUC = 0.50)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLACK.mix(0.2).stroke_width(3)));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(label_font)
        .position(SeriesLabelPosition::LowerRight)
        .draw()
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}

fn curve_label(c: &CohortRoc) -> String {
    format!(
        "{} (AUC = {:.2}, 95% CI {:.2}-{:.2})",
        c.name, c.interval.auc, c.interval.lower, c.interval.upper
    )
}

pub fn draw_roc<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &RocFigure,
) -> ReportResult<()> {
    let c = &figure.cohort;
    let caption = format!("{} (n = {} / {})", figure.title, c.n_cases, c.n_controls);
    draw_roc_axes(root, &caption, &[(curve_label(c), &c.curve, palette_colour(0))])
}

pub fn draw_summary_roc<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &SummaryRocFigure,
) -> ReportResult<()> {
    let curves: Vec<(String, &RocCurve, RGBColor)> = figure
        .cohorts
        .iter()
        .enumerate()
        .map(|(i, c)| (curve_label(c), &c.curve, palette_colour(i)))
        .collect();
    let caption = format!(
        "{} (pooled AUC = {:.2}, 95% CI {:.2}-{:.2})",
        figure.title, figure.pooled.auc, figure.pooled.lower, figure.pooled.upper
    );
    draw_roc_axes(root, &caption, &curves)
}
