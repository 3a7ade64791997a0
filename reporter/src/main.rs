use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ReportConfig;
use crate::data_handling::bundle::load_bundle;
use crate::driver::run_report;
use crate::helper_functions::resolve_from_root;
use crate::render::{ImageFormat, PlottersRenderer};

mod analysis;
mod config;
mod data_handling;
mod driver;
mod helper_functions;
mod models;
mod render;

/// Draws the signature report figures (ROC, violin and forest plots) for a dataset bundle.
#[derive(Debug, Parser)]
#[command(name = "reporter", version)]
struct Cli {
    /// Bundle manifest (JSON) listing cohorts, the gene filter and meta-analyses
    #[arg(long)]
    bundle: PathBuf,

    /// Optional JSON file with report settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory, overrides the config file
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<ImageFormat>,

    #[arg(long)]
    bootstrap_reps: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting the signature report");

    let mut config = match &cli.config {
        Some(path) => {
            let path = resolve_from_root(path);
            ReportConfig::from_path(&path)
                .with_context(|| format!("reading config {}", path.display()))?
        }
        None => ReportConfig::default(),
    };
    if let Some(output) = cli.output {
        config.output_root = output;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if let Some(reps) = cli.bootstrap_reps {
        config.bootstrap_reps = reps;
    }
    config.output_root = resolve_from_root(&config.output_root);

    let bundle_path = resolve_from_root(&cli.bundle);
    let bundle = load_bundle(&bundle_path)
        .with_context(|| format!("loading bundle {}", bundle_path.display()))?;

    let renderer = PlottersRenderer { seed: config.seed };
    let summary = run_report(&bundle, &renderer, &config)
        .with_context(|| format!("writing report to {}", config.output_root.display()))?;

    if summary.counts.failed > 0 {
        warn!("{} figures failed, see the log above", summary.counts.failed);
    }
    Ok(())
}
