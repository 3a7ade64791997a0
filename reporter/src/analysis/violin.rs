//! Violin plots of signature scores per phenotype group.

use std::cmp::Ordering;

use plotters::coord::Shift;
use plotters::prelude::*;

use crate::analysis::signature::grouped_scores;
use crate::analysis::{palette_colour, quantile_sorted};
use crate::models::{render_err, Cohort, GeneFilter, ReportError, ReportResult};

const GRID_POINTS: usize = 64;
const HALF_WIDTH: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct ViolinGroup {
    pub label: String,
    /// sorted ascending
    pub values: Vec<f64>,
    /// (score, density) pairs along the score axis
    pub density: Vec<(f64, f64)>,
    pub median: f64,
}

#[derive(Debug, Clone)]
pub struct ViolinFigure {
    pub title: String,
    pub label_column: String,
    pub groups: Vec<ViolinGroup>,
}

fn silverman_bandwidth(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let sd = if sorted.len() > 1 {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    let iqr = quantile_sorted(sorted, 0.75) - quantile_sorted(sorted, 0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    let bw = 0.9 * spread * n.powf(-0.2);
    if bw > 0.0 {
        bw
    } else {
        0.1 * (mean.abs() + 1.0)
    }
}

/// Gaussian kernel density of `sorted` on an even grid spanning three bandwidths past the data.
pub fn kernel_density(sorted: &[f64]) -> Vec<(f64, f64)> {
    if sorted.is_empty() {
        return Vec::new();
    }
    let bw = silverman_bandwidth(sorted);
    let lo = sorted[0] - 3.0 * bw;
    let hi = sorted[sorted.len() - 1] + 3.0 * bw;
    let step = (hi - lo) / (GRID_POINTS - 1) as f64;
    let norm = 1.0 / (sorted.len() as f64 * bw * (2.0 * std::f64::consts::PI).sqrt());

    (0..GRID_POINTS)
        .map(|k| {
            let y = lo + k as f64 * step;
            let d: f64 = sorted
                .iter()
                .map(|v| (-0.5 * ((y - v) / bw).powi(2)).exp())
                .sum();
            (y, d * norm)
        })
        .collect()
}

pub fn violin(
    filter: &GeneFilter,
    cohort: &Cohort,
    label_column: &str,
) -> ReportResult<ViolinFigure> {
    let groups = grouped_scores(filter, cohort, label_column)?;
    if groups.is_empty() {
        return Err(ReportError::Render(format!(
            "{} has no labelled samples in '{}'",
            cohort.name, label_column
        )));
    }

    let groups = groups
        .into_iter()
        .map(|(label, mut values)| {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let density = kernel_density(&values);
            let median = quantile_sorted(&values, 0.5);
            ViolinGroup {
                label,
                values,
                density,
                median,
            }
        })
        .collect();

    Ok(ViolinFigure {
        title: cohort.name.clone(),
        label_column: label_column.to_string(),
        groups,
    })
}

pub fn draw_violin<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &ViolinFigure,
) -> ReportResult<()> {
    root.fill(&WHITE).map_err(render_err)?;

    let (y_lo, y_hi) = figure
        .groups
        .iter()
        .flat_map(|g| g.density.iter().map(|(y, _)| *y))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    let n = figure.groups.len();
    let labels: Vec<String> = figure
        .groups
        .iter()
        .map(|g| format!("{} (n = {})", g.label, g.values.len()))
        .collect();

    let mut chart = ChartBuilder::on(root)
        .caption(&figure.title, ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), y_lo..y_hi)
        .map_err(render_err)?;

    let formatter = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() < 1e-6 && idx >= 0.0 && (idx as usize) < labels.len() {
            labels[idx as usize].clone()
        } else {
            String::new()
        }
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&formatter)
        .x_desc(figure.label_column.as_str())
        .y_desc("Signature score")
        .label_style(("sans-serif", 16))
        .draw()
        .map_err(render_err)?;

    for (i, group) in figure.groups.iter().enumerate() {
        let centre = i as f64;
        let colour = palette_colour(i);
        let peak = group
            .density
            .iter()
            .map(|(_, d)| *d)
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);

        let mut outline: Vec<(f64, f64)> = group
            .density
            .iter()
            .map(|(y, d)| (centre + HALF_WIDTH * d / peak, *y))
            .collect();
        outline.extend(
            group
                .density
                .iter()
                .rev()
                .map(|(y, d)| (centre - HALF_WIDTH * d / peak, *y)),
        );

        chart
            .draw_series(std::iter::once(Polygon::new(outline, colour.mix(0.45).filled())))
            .map_err(render_err)?;

        chart
            .draw_series(group.values.iter().enumerate().map(|(k, &v)| {
                let jitter = ((k * 37) % 11) as f64 / 10.0 - 0.5;
                Circle::new((centre + 0.15 * jitter, v), 3, BLACK.mix(0.7).filled())
            }))
            .map_err(render_err)?;

        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(centre - 0.25, group.median), (centre + 0.25, group.median)],
                BLACK.stroke_width(3),
            )))
            .map_err(render_err)?;
    }

    root.present().map_err(render_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::tiny_cohort;

    #[test]
    fn density_integrates_to_about_one() {
        let values = vec![-1.0, -0.5, 0.0, 0.2, 0.4, 1.0, 1.5];
        let grid = kernel_density(&values);
        assert_eq!(grid.len(), GRID_POINTS);
        let step = grid[1].0 - grid[0].0;
        let area: f64 = grid.iter().map(|(_, d)| d * step).sum();
        assert!((area - 1.0).abs() < 0.05, "area = {area}");
    }

    #[test]
    fn constant_values_still_get_a_bandwidth() {
        let grid = kernel_density(&[2.0, 2.0, 2.0]);
        assert!(grid.iter().all(|(_, d)| d.is_finite()));
        assert!(grid.iter().any(|(_, d)| *d > 0.0));
    }

    #[test]
    fn violin_groups_follow_label_values() {
        let filter = GeneFilter {
            name: None,
            pos_genes: vec!["TP53".into()],
            neg_genes: vec!["MYC".into()],
        };
        let fig = violin(&filter, &tiny_cohort("OKA"), "group").unwrap();
        assert_eq!(fig.groups.len(), 2);
        assert_eq!(fig.groups[0].label, "1");
        assert_eq!(fig.groups[0].values, vec![4.0, 4.5]);
        assert_eq!(fig.groups[1].median, -3.0);
    }

    #[test]
    fn unknown_label_column_fails() {
        let filter = GeneFilter {
            name: None,
            pos_genes: vec!["TP53".into()],
            neg_genes: vec![],
        };
        assert!(violin(&filter, &tiny_cohort("OKA"), "response").is_err());
    }
}
