use tracing::debug;

use crate::models::{Cohort, GeneFilter, ReportError, ReportResult};

/// Per-sample score: mean of the positive genes minus mean of the negative genes.
///
/// Genes absent from the cohort are ignored; a side with no present gene contributes 0.
/// NaN expression values are skipped per sample.
pub fn signature_scores(filter: &GeneFilter, cohort: &Cohort) -> ReportResult<Vec<f64>> {
    let rows = |genes: &[String]| -> Vec<usize> {
        genes.iter().filter_map(|g| cohort.gene_row(g)).collect()
    };
    let pos = rows(&filter.pos_genes);
    let neg = rows(&filter.neg_genes);

    if pos.is_empty() && neg.is_empty() {
        return Err(ReportError::Render(format!(
            "none of the filter genes are measured in {}",
            cohort.name
        )));
    }
    debug!(
        "{}: {} positive and {} negative genes present",
        cohort.name,
        pos.len(),
        neg.len()
    );

    let side_mean = |rows: &[usize], sample: usize| -> f64 {
        let (sum, n) = rows
            .iter()
            .map(|&r| cohort.expression[[r, sample]])
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    };

    Ok((0..cohort.samples.len())
        .map(|j| side_mean(&pos, j) - side_mean(&neg, j))
        .collect())
}

/// Maps a phenotype value to case (`true`) or control (`false`).
pub fn parse_label(value: &str) -> Option<bool> {
    let v = value.trim().to_ascii_lowercase();
    match v.as_str() {
        "1" | "case" | "responder" | "yes" | "true" => Some(true),
        "0" | "control" | "non-responder" | "nonresponder" | "no" | "false" => Some(false),
        _ => match v.parse::<f64>() {
            Ok(x) if x == 1.0 => Some(true),
            Ok(x) if x == 0.0 => Some(false),
            _ => None,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelledScores {
    pub cases: Vec<f64>,
    pub controls: Vec<f64>,
}

impl LabelledScores {
    pub fn scores_and_labels(&self) -> (Vec<f64>, Vec<bool>) {
        let scores = self.cases.iter().chain(self.controls.iter()).copied().collect();
        let labels = std::iter::repeat(true)
            .take(self.cases.len())
            .chain(std::iter::repeat(false).take(self.controls.len()))
            .collect();
        (scores, labels)
    }
}

/// Splits finite signature scores into cases and controls using `label_column`.
pub fn labelled_scores(
    filter: &GeneFilter,
    cohort: &Cohort,
    label_column: &str,
) -> ReportResult<LabelledScores> {
    let scores = signature_scores(filter, cohort)?;
    let labels = cohort.label_values(label_column)?;

    let mut out = LabelledScores::default();
    for (score, label) in scores.iter().zip(labels) {
        if !score.is_finite() {
            continue;
        }
        match label.as_deref().and_then(parse_label) {
            Some(true) => out.cases.push(*score),
            Some(false) => out.controls.push(*score),
            None => {}
        }
    }
    Ok(out)
}

/// Signature scores grouped by the raw phenotype value, groups in first-seen order.
pub fn grouped_scores(
    filter: &GeneFilter,
    cohort: &Cohort,
    label_column: &str,
) -> ReportResult<Vec<(String, Vec<f64>)>> {
    let scores = signature_scores(filter, cohort)?;
    let labels = cohort.label_values(label_column)?;

    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for (score, label) in scores.iter().zip(labels) {
        let Some(label) = label else { continue };
        if !score.is_finite() {
            continue;
        }
        match groups.iter_mut().find(|(g, _)| g == label) {
            Some((_, values)) => values.push(*score),
            None => groups.push((label.clone(), vec![*score])),
        }
    }
    Ok(groups)
}
