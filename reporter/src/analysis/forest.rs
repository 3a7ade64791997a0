//! Per-gene effect sizes across cohorts and their random-effects pooling.

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::debug;

use crate::analysis::roc::normal_quantile;
use crate::analysis::signature::parse_label;
use crate::models::{render_err, Cohort, MetaAnalysis, ReportResult};
use crate::render::ForestStyle;

/// Hedges' g of cases versus controls in one cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyEffect {
    pub study: String,
    pub g: f64,
    pub se: f64,
    pub n_cases: usize,
    pub n_controls: usize,
}

impl StudyEffect {
    pub fn ci(&self, z: f64) -> (f64, f64) {
        (self.g - z * self.se, self.g + z * self.se)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledEffect {
    pub estimate: f64,
    pub se: f64,
    pub tau2: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct ForestFigure {
    pub gene: String,
    pub studies: Vec<StudyEffect>,
    pub pooled: PooledEffect,
    pub z: f64,
}

fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Hedges' g for `gene` in `cohort`, `None` when the gene is not measured or a group
/// has fewer than two samples or there is no variance.
pub fn study_effect(gene: &str, cohort: &Cohort, label_column: &str) -> Option<StudyEffect> {
    let row = cohort.gene_row(gene)?;
    let labels = cohort.pheno.get(label_column)?;

    let (mut cases, mut controls) = (Vec::new(), Vec::new());
    for (j, label) in labels.iter().enumerate() {
        let v = cohort.expression[[row, j]];
        if !v.is_finite() {
            continue;
        }
        match label.as_deref().and_then(parse_label) {
            Some(true) => cases.push(v),
            Some(false) => controls.push(v),
            None => {}
        }
    }
    if cases.len() < 2 || controls.len() < 2 {
        return None;
    }

    let (n1, n2) = (cases.len() as f64, controls.len() as f64);
    let (m1, v1) = mean_var(&cases);
    let (m2, v2) = mean_var(&controls);
    let pooled_sd = (((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / (n1 + n2 - 2.0)).sqrt();
    if pooled_sd <= 0.0 || !pooled_sd.is_finite() {
        return None;
    }

    let d = (m1 - m2) / pooled_sd;
    let correction = 1.0 - 3.0 / (4.0 * (n1 + n2) - 9.0);
    let g = correction * d;
    let var = (n1 + n2) / (n1 * n2) + g * g / (2.0 * (n1 + n2));

    Some(StudyEffect {
        study: cohort.name.clone(),
        g,
        se: var.sqrt(),
        n_cases: cases.len(),
        n_controls: controls.len(),
    })
}

/// DerSimonian–Laird random-effects pooling.
pub fn pool_random_effects(studies: &[StudyEffect], z: f64) -> Option<PooledEffect> {
    if studies.is_empty() {
        return None;
    }
    let weights: Vec<f64> = studies.iter().map(|s| 1.0 / (s.se * s.se)).collect();
    let sum_w: f64 = weights.iter().sum();
    let fixed = studies.iter().zip(&weights).map(|(s, w)| w * s.g).sum::<f64>() / sum_w;

    let q: f64 = studies
        .iter()
        .zip(&weights)
        .map(|(s, w)| w * (s.g - fixed).powi(2))
        .sum();
    let df = (studies.len() - 1) as f64;
    let c = sum_w - weights.iter().map(|w| w * w).sum::<f64>() / sum_w;
    let tau2 = if c > 0.0 { ((q - df) / c).max(0.0) } else { 0.0 };

    let re_weights: Vec<f64> = studies.iter().map(|s| 1.0 / (s.se * s.se + tau2)).collect();
    let sum_re: f64 = re_weights.iter().sum();
    let estimate = studies.iter().zip(&re_weights).map(|(s, w)| w * s.g).sum::<f64>() / sum_re;
    let se = (1.0 / sum_re).sqrt();

    Some(PooledEffect {
        estimate,
        se,
        tau2,
        lower: estimate - z * se,
        upper: estimate + z * se,
    })
}

/// Forest plot data for `gene`; `None` when no cohort of `meta` yields an effect size.
pub fn forest(gene: &str, meta: &MetaAnalysis) -> ReportResult<Option<ForestFigure>> {
    let studies: Vec<StudyEffect> = meta
        .cohorts
        .iter()
        .filter_map(|c| study_effect(gene, c, &meta.label_column))
        .collect();
    let z = normal_quantile(0.975)?;
    let Some(pooled) = pool_random_effects(&studies, z) else {
        debug!("{}: no effect sizes in {}", gene, meta.name);
        return Ok(None);
    };
    Ok(Some(ForestFigure {
        gene: gene.to_string(),
        studies,
        pooled,
        z,
    }))
}

pub fn draw_forest<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &ForestFigure,
    style: &ForestStyle,
) -> ReportResult<()> {
    root.fill(&WHITE).map_err(render_err)?;

    let mut x_lo = figure.pooled.lower.min(0.0);
    let mut x_hi = figure.pooled.upper.max(0.0);
    for s in &figure.studies {
        let (lo, hi) = s.ci(figure.z);
        x_lo = x_lo.min(lo);
        x_hi = x_hi.max(hi);
    }
    let pad = 0.05 * (x_hi - x_lo).max(1e-6);

    // rows from the top: studies first, pooled summary last
    let rows = figure.studies.len() + 1;
    let row_y = |row: usize| (rows - row) as f64;
    let mut row_labels: Vec<String> = figure
        .studies
        .iter()
        .map(|s| {
            if style.show_sample_sizes {
                format!("{} ({}/{})", s.study, s.n_cases, s.n_controls)
            } else {
                s.study.clone()
            }
        })
        .collect();
    row_labels.push("Summary".to_string());

    let mut chart = ChartBuilder::on(root)
        .caption(&figure.gene, ("sans-serif", style.title_size))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(style.label_area)
        .build_cartesian_2d((x_lo - pad)..(x_hi + pad), 0.0..(rows as f64 + 1.0))
        .map_err(render_err)?;

    let y_formatter = |y: &f64| {
        let r = y.round();
        if (y - r).abs() > 1e-6 || r < 1.0 || r > rows as f64 {
            return String::new();
        }
        row_labels[rows - r as usize].clone()
    };

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(rows + 2)
        .y_label_formatter(&y_formatter)
        .x_desc("Standardized mean difference (log2 scale)")
        .label_style(("sans-serif", style.text_size))
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(0.0, 0.0), (0.0, rows as f64 + 1.0)],
            BLACK.mix(0.4).stroke_width(1),
        )))
        .map_err(render_err)?;

    let max_weight = figure
        .studies
        .iter()
        .map(|s| 1.0 / (s.se * s.se))
        .fold(0.0_f64, f64::max);

    for (row, s) in figure.studies.iter().enumerate() {
        let y = row_y(row);
        let (lo, hi) = s.ci(figure.z);
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(lo, y), (hi, y)],
                style.study_colour.stroke_width(2),
            )))
            .map_err(render_err)?;

        let weight = 1.0 / (s.se * s.se) / max_weight;
        let half = (4.0 + 8.0 * weight.sqrt()) as i32;
        chart
            .draw_series(std::iter::once(EmptyElement::at((s.g, y)) + Rectangle::new(
                [(-half, -half), (half, half)],
                style.study_colour.filled(),
            )))
            .map_err(render_err)?;
    }

    let p = &figure.pooled;
    let y = row_y(figure.studies.len());
    chart
        .draw_series(std::iter::once(Polygon::new(
            vec![(p.lower, y), (p.estimate, y + 0.3), (p.upper, y), (p.estimate, y - 0.3)],
            style.summary_colour.filled(),
        )))
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}
