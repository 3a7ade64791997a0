use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::Array2;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::helper_functions::read_csv;
use crate::models::{Cohort, ReportError, ReportResult};

const GENE_COL: &str = "gene";
const SAMPLE_COL: &str = "sample";

/// CSV files backing one cohort.
///
/// * expression: `gene` column followed by one numeric column per sample
/// * pheno: `sample` column plus any phenotype columns
pub struct CohortFiles {
    pub expression: PathBuf,
    pub pheno: Option<PathBuf>,
}

impl CohortFiles {
    pub fn load(&self, name: &str) -> ReportResult<Cohort> {
        info!("Reading cohort {} from {}", name, self.expression.display());
        let expr = read_csv(&self.expression)?;
        let (genes, samples, matrix) = expression_matrix(name, &expr)?;

        let pheno = match &self.pheno {
            Some(path) => {
                debug!("Reading phenotypes for {} from {}", name, path.display());
                let df = read_csv(path)?;
                align_pheno(name, &df, &samples)?
            }
            None => HashMap::new(),
        };

        Cohort::new(name, genes, samples, matrix, pheno)
    }
}

fn expression_matrix(
    name: &str,
    df: &DataFrame,
) -> ReportResult<(Vec<String>, Vec<String>, Array2<f64>)> {
    if df.width() < 2 {
        return Err(ReportError::Bundle(format!(
            "cohort {}: expression table needs a gene column and at least one sample",
            name
        )));
    }
    let columns = df.get_columns();
    let gene_pos = columns
        .iter()
        .position(|c| c.name().as_str() == GENE_COL)
        .unwrap_or(0);

    let gene_col = columns[gene_pos].cast(&DataType::String)?;
    let gene_ca = gene_col.str()?;
    let genes: Vec<String> = (0..df.height())
        .map(|i| gene_ca.get(i).unwrap_or_default().to_string())
        .collect();

    let sample_cols: Vec<&Column> = columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != gene_pos)
        .map(|(_, c)| c)
        .collect();

    let samples: Vec<String> = sample_cols.iter().map(|c| c.name().to_string()).collect();
    let mut matrix = Array2::<f64>::from_elem((genes.len(), samples.len()), f64::NAN);
    let mut nulls = 0usize;

    for (j, col) in sample_cols.iter().enumerate() {
        let values = col.cast(&DataType::Float64)?;
        let values = values.f64()?;
        for i in 0..genes.len() {
            match values.get(i) {
                Some(v) => matrix[[i, j]] = v,
                None => nulls += 1,
            }
        }
    }

    if nulls > 0 {
        warn!("Cohort {}: {} missing expression values kept as NaN", name, nulls);
    }
    Ok((genes, samples, matrix))
}

fn align_pheno(
    name: &str,
    df: &DataFrame,
    samples: &[String],
) -> ReportResult<HashMap<String, Vec<Option<String>>>> {
    let sample_col = df
        .column(SAMPLE_COL)
        .map_err(|_| {
            ReportError::Bundle(format!(
                "cohort {}: phenotype table has no '{}' column",
                name, SAMPLE_COL
            ))
        })?
        .cast(&DataType::String)?;
    let sample_ca = sample_col.str()?;

    let row_of: HashMap<&str, usize> = (0..df.height())
        .filter_map(|i| sample_ca.get(i).map(|s| (s, i)))
        .collect();

    let unmatched = samples.iter().filter(|s| !row_of.contains_key(s.as_str())).count();
    if unmatched > 0 {
        warn!(
            "Cohort {}: {} samples have no phenotype row",
            name, unmatched
        );
    }

    let mut pheno = HashMap::new();
    for col in df.get_columns() {
        if col.name().as_str() == SAMPLE_COL {
            continue;
        }
        let as_str = col.cast(&DataType::String)?;
        let ca = as_str.str()?;
        let aligned: Vec<Option<String>> = samples
            .iter()
            .map(|s| {
                row_of
                    .get(s.as_str())
                    .and_then(|&row| ca.get(row))
                    .map(str::to_string)
            })
            .collect();
        pheno.insert(col.name().to_string(), aligned);
    }
    Ok(pheno)
}
