use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{io_err, ReportResult};
use crate::render::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureSize {
    pub width: u32,
    pub height: u32,
}

impl FigureSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Run settings. Every field has a default, so a config file may list only what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_root: PathBuf,
    pub format: ImageFormat,
    pub bootstrap_reps: usize,
    /// phenotype column holding case/control labels for violin and ROC plots
    pub label_column: String,
    pub seed: u64,
    pub roc_size: FigureSize,
    pub violin_size: FigureSize,
    pub forest_size: FigureSize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("results"),
            format: ImageFormat::Png,
            bootstrap_reps: 100,
            label_column: "group".to_string(),
            seed: 42,
            roc_size: FigureSize::new(800, 800),
            violin_size: FigureSize::new(600, 600),
            forest_size: FigureSize::new(900, 600),
        }
    }
}

impl ReportConfig {
    pub fn from_path(path: &Path) -> ReportResult<Self> {
        let file = File::open(path).map_err(io_err(path))?;
        Ok(serde_json::from_reader(file)?)
    }
}
