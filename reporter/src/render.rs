//! The rendering capability consumed by the report driver, and its plotters implementation.

use std::path::Path;

use clap::ValueEnum;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::forest::{self, draw_forest, ForestFigure};
use crate::analysis::roc::{self, draw_roc, draw_summary_roc, RocFigure, SummaryRocFigure};
use crate::analysis::violin::{self, draw_violin, ViolinFigure};
use crate::models::{Cohort, GeneFilter, MetaAnalysis, ReportError, ReportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }

    pub fn from_path(path: &Path) -> ReportResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("png") => Ok(ImageFormat::Png),
            Some(e) if e.eq_ignore_ascii_case("svg") => Ok(ImageFormat::Svg),
            _ => Err(ReportError::Render(format!(
                "unsupported image extension for {}",
                path.display()
            ))),
        }
    }
}

/// Look of a forest plot.
#[derive(Debug, Clone)]
pub struct ForestStyle {
    pub title_size: u32,
    pub text_size: u32,
    pub label_area: u32,
    pub study_colour: RGBColor,
    pub summary_colour: RGBColor,
    pub show_sample_sizes: bool,
}

impl Default for ForestStyle {
    fn default() -> Self {
        Self {
            title_size: 22,
            text_size: 15,
            label_area: 190,
            study_colour: RGBColor(40, 40, 40),
            summary_colour: RGBColor(200, 30, 30),
            show_sample_sizes: true,
        }
    }
}

/// Something that can be written to an image file at a given pixel size.
pub trait Figure {
    fn save(&self, path: &Path, size: (u32, u32)) -> ReportResult<()>;
}

/// Statistics and plotting used by the report driver.
pub trait Renderer {
    type Output: Figure;

    fn summary_roc(
        &self,
        meta: &MetaAnalysis,
        filter: &GeneFilter,
        bootstrap_reps: usize,
    ) -> ReportResult<Self::Output>;

    fn violin(
        &self,
        filter: &GeneFilter,
        cohort: &Cohort,
        label_column: &str,
    ) -> ReportResult<Self::Output>;

    fn roc(
        &self,
        filter: &GeneFilter,
        cohort: &Cohort,
        label_column: &str,
        title: &str,
        bootstrap_reps: usize,
    ) -> ReportResult<Self::Output>;

    /// `Ok(None)` when the meta-analysis holds no effect sizes for `gene`.
    fn forest(
        &self,
        gene: &str,
        meta: &MetaAnalysis,
        style: &ForestStyle,
    ) -> ReportResult<Option<Self::Output>>;
}

#[derive(Debug, Clone)]
pub enum PlotFigure {
    SummaryRoc(SummaryRocFigure),
    Roc(RocFigure),
    Violin(ViolinFigure),
    Forest(ForestFigure, ForestStyle),
}

impl PlotFigure {
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, plotters::coord::Shift>) -> ReportResult<()> {
        match self {
            PlotFigure::SummaryRoc(f) => draw_summary_roc(root, f),
            PlotFigure::Roc(f) => draw_roc(root, f),
            PlotFigure::Violin(f) => draw_violin(root, f),
            PlotFigure::Forest(f, style) => draw_forest(root, f, style),
        }
    }
}

impl Figure for PlotFigure {
    fn save(&self, path: &Path, size: (u32, u32)) -> ReportResult<()> {
        match ImageFormat::from_path(path)? {
            ImageFormat::Png => {
                let root = BitMapBackend::new(path, size).into_drawing_area();
                self.draw(&root)
            }
            ImageFormat::Svg => {
                let root = SVGBackend::new(path, size).into_drawing_area();
                self.draw(&root)
            }
        }
    }
}

/// Renders with the crate's own statistics and draws with plotters.
#[derive(Debug, Clone)]
pub struct PlottersRenderer {
    pub seed: u64,
}

impl Renderer for PlottersRenderer {
    type Output = PlotFigure;

    fn summary_roc(
        &self,
        meta: &MetaAnalysis,
        filter: &GeneFilter,
        bootstrap_reps: usize,
    ) -> ReportResult<PlotFigure> {
        roc::summary_roc(meta, filter, bootstrap_reps, self.seed).map(PlotFigure::SummaryRoc)
    }

    fn violin(
        &self,
        filter: &GeneFilter,
        cohort: &Cohort,
        label_column: &str,
    ) -> ReportResult<PlotFigure> {
        violin::violin(filter, cohort, label_column).map(PlotFigure::Violin)
    }

    fn roc(
        &self,
        filter: &GeneFilter,
        cohort: &Cohort,
        label_column: &str,
        title: &str,
        bootstrap_reps: usize,
    ) -> ReportResult<PlotFigure> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let cohort = roc::cohort_roc(filter, cohort, label_column, bootstrap_reps, &mut rng)?;
        Ok(PlotFigure::Roc(RocFigure {
            title: title.to_string(),
            cohort,
        }))
    }

    fn forest(
        &self,
        gene: &str,
        meta: &MetaAnalysis,
        style: &ForestStyle,
    ) -> ReportResult<Option<PlotFigure>> {
        Ok(forest::forest(gene, meta)?.map(|f| PlotFigure::Forest(f, style.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::tiny_cohort;

    #[test]
    fn format_follows_extension() {
        assert_eq!(ImageFormat::from_path(Path::new("a/b.png")).unwrap(), ImageFormat::Png);
        assert_eq!(ImageFormat::from_path(Path::new("b.SVG")).unwrap(), ImageFormat::Svg);
        assert!(ImageFormat::from_path(Path::new("b.pdf")).is_err());
        assert!(ImageFormat::from_path(Path::new("noext")).is_err());
    }

    fn signature_filter() -> GeneFilter {
        GeneFilter {
            name: None,
            pos_genes: vec!["TP53".into()],
            neg_genes: vec!["MYC".into()],
        }
    }

    fn training_meta() -> MetaAnalysis {
        MetaAnalysis {
            name: "training_bundle".into(),
            label_column: "group".into(),
            cohorts: vec![tiny_cohort("GSE135222"), tiny_cohort("POPLAR")],
        }
    }

    #[test]
    fn plotters_renderer_builds_figures() {
        let renderer = PlottersRenderer { seed: 1 };
        let filter = signature_filter();
        let cohort = tiny_cohort("WHTJ2");
        let meta = training_meta();

        assert!(matches!(
            renderer.roc(&filter, &cohort, "group", "WHTJ2", 0).unwrap(),
            PlotFigure::Roc(_)
        ));
        assert!(matches!(
            renderer.violin(&filter, &cohort, "group").unwrap(),
            PlotFigure::Violin(_)
        ));
        assert!(matches!(
            renderer.summary_roc(&meta, &filter, 10).unwrap(),
            PlotFigure::SummaryRoc(_)
        ));
        assert!(renderer
            .forest("NOT_THERE", &meta, &ForestStyle::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn single_cohort_roc_uses_bootstrap_reps() {
        let renderer = PlottersRenderer { seed: 3 };
        let filter = GeneFilter {
            name: None,
            pos_genes: vec!["TP53".into()],
            neg_genes: vec![],
        };
        let mut pheno = std::collections::HashMap::new();
        pheno.insert(
            "group".to_string(),
            ["1", "1", "1", "0", "0", "0"].iter().map(|s| Some(s.to_string())).collect(),
        );
        let cohort = Cohort::new(
            "WHTJ2",
            vec!["TP53".into()],
            (1..=6).map(|i| format!("s{}", i)).collect(),
            ndarray::array![[3.0, 1.0, 5.0, 2.0, 4.0, 0.0]],
            pheno,
        )
        .unwrap();

        let interval = |reps| match renderer.roc(&filter, &cohort, "group", "WHTJ2", reps).unwrap() {
            PlotFigure::Roc(f) => f.cohort.interval,
            other => panic!("unexpected figure {:?}", other),
        };
        let normal = interval(0);
        assert_eq!(interval(1), normal);
        let boot = interval(50);
        assert_eq!(boot.auc, normal.auc);
        assert_ne!(boot.se, normal.se);
        // same seed, same interval
        assert_eq!(interval(50), boot);
    }

    #[test]
    fn every_figure_kind_saves_as_png_and_svg() {
        let renderer = PlottersRenderer { seed: 1 };
        let filter = signature_filter();
        let cohort = tiny_cohort("WHTJ2");
        let meta = training_meta();

        let figures = vec![
            ("summary_roc", renderer.summary_roc(&meta, &filter, 10).unwrap()),
            ("roc", renderer.roc(&filter, &cohort, "group", "WHTJ2", 10).unwrap()),
            ("violin", renderer.violin(&filter, &cohort, "group").unwrap()),
            (
                "forest",
                renderer
                    .forest("TP53", &meta, &ForestStyle::default())
                    .unwrap()
                    .expect("TP53 separates the groups"),
            ),
        ];

        let dir = tempfile::tempdir().unwrap();
        for (stem, figure) in &figures {
            for ext in ["png", "svg"] {
                let path = dir.path().join(format!("{}.{}", stem, ext));
                figure.save(&path, (400, 300)).unwrap();
                let len = std::fs::metadata(&path).unwrap().len();
                assert!(len > 0, "{} is empty", path.display());
            }
        }
    }
}
