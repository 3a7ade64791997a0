use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use ndarray::Array2;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("missing bundle entries: {}", keys.join(", "))]
    MissingInput { keys: Vec<String> },

    #[error("bundle entry '{key}' is a {found}, expected a {expected}")]
    WrongKind {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("render failed: {0}")]
    Render(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Wraps any displayable drawing/statistics failure as a render fault.
pub fn render_err<E: std::fmt::Display>(e: E) -> ReportError {
    ReportError::Render(e.to_string())
}

pub fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ReportError {
    let path = path.into();
    move |source| ReportError::Io { path, source }
}

/// One expression cohort: a genes × samples matrix plus per-sample phenotype columns.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub name: String,
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    pub expression: Array2<f64>,
    pub pheno: HashMap<String, Vec<Option<String>>>,
    gene_index: HashMap<String, usize>,
}

impl Cohort {
    pub fn new(
        name: impl Into<String>,
        genes: Vec<String>,
        samples: Vec<String>,
        expression: Array2<f64>,
        pheno: HashMap<String, Vec<Option<String>>>,
    ) -> ReportResult<Self> {
        let name = name.into();
        if expression.dim() != (genes.len(), samples.len()) {
            return Err(ReportError::Bundle(format!(
                "cohort {}: expression matrix is {:?}, expected {} genes x {} samples",
                name,
                expression.dim(),
                genes.len(),
                samples.len()
            )));
        }
        for (column, values) in &pheno {
            if values.len() != samples.len() {
                return Err(ReportError::Bundle(format!(
                    "cohort {}: phenotype column '{}' has {} values for {} samples",
                    name,
                    column,
                    values.len(),
                    samples.len()
                )));
            }
        }
        // first occurrence wins for duplicated gene rows
        let mut gene_index = HashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            gene_index.entry(gene.clone()).or_insert(i);
        }
        Ok(Self {
            name,
            genes,
            samples,
            expression,
            pheno,
            gene_index,
        })
    }

    pub fn gene_row(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    pub fn label_values(&self, column: &str) -> ReportResult<&[Option<String>]> {
        self.pheno
            .get(column)
            .map(|v| v.as_slice())
            .ok_or_else(|| {
                ReportError::Render(format!(
                    "cohort {} has no phenotype column '{}'",
                    self.name, column
                ))
            })
    }
}

/// A fitted marker selection: genes up-regulated and down-regulated in cases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneFilter {
    pub name: Option<String>,
    pub pos_genes: Vec<String>,
    pub neg_genes: Vec<String>,
}

impl GeneFilter {
    /// Positive genes followed by negative genes. Duplicates are kept.
    pub fn all_genes(&self) -> Vec<&str> {
        self.pos_genes
            .iter()
            .chain(self.neg_genes.iter())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MetaAnalysis {
    pub name: String,
    pub label_column: String,
    pub cohorts: Vec<Cohort>,
}

#[derive(Debug, Clone)]
pub enum Dataset {
    Cohort(Cohort),
    Filter(GeneFilter),
    MetaAnalysis(MetaAnalysis),
}

impl Dataset {
    pub fn kind(&self) -> &'static str {
        match self {
            Dataset::Cohort(_) => "cohort",
            Dataset::Filter(_) => "filter",
            Dataset::MetaAnalysis(_) => "meta-analysis",
        }
    }
}

/// Named datasets available to a report run. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    entries: BTreeMap<String, Dataset>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, dataset: Dataset) {
        self.entries.insert(key.into(), dataset);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Dataset> {
        self.entries.get(key)
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Required keys absent from the bundle, in the order they were asked for.
    pub fn missing_keys(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|k| !self.contains(k))
            .map(|k| k.to_string())
            .collect()
    }

    fn lookup(&self, key: &str) -> ReportResult<&Dataset> {
        self.get(key).ok_or_else(|| ReportError::MissingInput {
            keys: vec![key.to_string()],
        })
    }

    pub fn cohort(&self, key: &str) -> ReportResult<&Cohort> {
        match self.lookup(key)? {
            Dataset::Cohort(c) => Ok(c),
            other => Err(wrong_kind(key, "cohort", other)),
        }
    }

    pub fn filter(&self, key: &str) -> ReportResult<&GeneFilter> {
        match self.lookup(key)? {
            Dataset::Filter(f) => Ok(f),
            other => Err(wrong_kind(key, "filter", other)),
        }
    }

    pub fn meta_analysis(&self, key: &str) -> ReportResult<&MetaAnalysis> {
        match self.lookup(key)? {
            Dataset::MetaAnalysis(m) => Ok(m),
            other => Err(wrong_kind(key, "meta-analysis", other)),
        }
    }
}

fn wrong_kind(key: &str, expected: &'static str, found: &Dataset) -> ReportError {
    ReportError::WrongKind {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    /// Two genes, four samples, two cases and two controls in column "group".
    pub(crate) fn tiny_cohort(name: &str) -> Cohort {
        let mut pheno = HashMap::new();
        pheno.insert(
            "group".to_string(),
            ["1", "1", "0", "0"].iter().map(|s| Some(s.to_string())).collect(),
        );
        Cohort::new(
            name,
            vec!["TP53".into(), "MYC".into()],
            vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
            array![[5.0, 6.0, 1.0, 2.0], [1.0, 1.5, 4.0, 5.0]],
            pheno,
        )
        .unwrap()
    }

    #[test]
    fn missing_keys_keep_request_order() {
        let mut bundle = Bundle::new();
        bundle.insert("filter", Dataset::Filter(GeneFilter::default()));
        assert_eq!(
            bundle.missing_keys(&["WHTJ2", "filter", "OKA"]),
            vec!["WHTJ2".to_string(), "OKA".to_string()]
        );
    }

    #[test]
    fn typed_lookup_reports_wrong_kind() {
        let mut bundle = Bundle::new();
        bundle.insert("filter", Dataset::Filter(GeneFilter::default()));
        bundle.insert("OKA", Dataset::Cohort(tiny_cohort("OKA")));

        assert!(bundle.cohort("OKA").is_ok());
        match bundle.cohort("filter") {
            Err(ReportError::WrongKind { expected, found, .. }) => {
                assert_eq!(expected, "cohort");
                assert_eq!(found, "filter");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            bundle.meta_analysis("training_bundle"),
            Err(ReportError::MissingInput { .. })
        ));
    }

    #[test]
    fn cohort_rejects_mismatched_dimensions() {
        let err = Cohort::new(
            "bad",
            vec!["A".into()],
            vec!["s1".into(), "s2".into()],
            array![[1.0, 2.0, 3.0]],
            HashMap::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn all_genes_keeps_duplicates_in_order() {
        let filter = GeneFilter {
            name: None,
            pos_genes: vec!["CD274".into(), "MYC".into()],
            neg_genes: vec!["MYC".into()],
        };
        assert_eq!(filter.all_genes(), vec!["CD274", "MYC", "MYC"]);
    }
}
