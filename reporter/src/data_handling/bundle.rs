//! Bundle manifest loading.
//!
//! ```json
//! {
//!   "datasets": {
//!     "filter":          { "kind": "filter", "pos_genes": ["CD274"], "neg_genes": ["MYC"] },
//!     "GSE135222":       { "kind": "cohort", "expression": "GSE135222_expr.csv",
//!                          "pheno": "GSE135222_pheno.csv" },
//!     "training_bundle": { "kind": "meta_analysis", "cohorts": ["GSE135222"] }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::data_handling::cohort::CohortFiles;
use crate::models::{io_err, Bundle, Cohort, Dataset, GeneFilter, MetaAnalysis, ReportError, ReportResult};

fn default_label_column() -> String {
    "group".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BundleManifest {
    pub datasets: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Cohort {
        expression: PathBuf,
        #[serde(default)]
        pheno: Option<PathBuf>,
    },
    Filter {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        pos_genes: Vec<String>,
        #[serde(default)]
        neg_genes: Vec<String>,
    },
    MetaAnalysis {
        cohorts: Vec<String>,
        #[serde(default = "default_label_column")]
        label_column: String,
    },
}

impl BundleManifest {
    pub fn from_path(path: &Path) -> ReportResult<Self> {
        let file = File::open(path).map_err(io_err(path))?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Materialises every entry. Relative file paths are taken from `base_dir`.
    pub fn load(&self, base_dir: &Path) -> ReportResult<Bundle> {
        let mut cohorts: HashMap<&str, Cohort> = HashMap::new();
        for (key, entry) in &self.datasets {
            if let ManifestEntry::Cohort { expression, pheno } = entry {
                let files = CohortFiles {
                    expression: base_dir.join(expression),
                    pheno: pheno.as_ref().map(|p| base_dir.join(p)),
                };
                cohorts.insert(key.as_str(), files.load(key)?);
            }
        }

        let mut bundle = Bundle::new();
        for (key, entry) in &self.datasets {
            let dataset = match entry {
                ManifestEntry::Cohort { .. } => match cohorts.get(key.as_str()) {
                    Some(c) => Dataset::Cohort(c.clone()),
                    None => continue,
                },
                ManifestEntry::Filter {
                    name,
                    pos_genes,
                    neg_genes,
                } => Dataset::Filter(GeneFilter {
                    name: name.clone(),
                    pos_genes: pos_genes.clone(),
                    neg_genes: neg_genes.clone(),
                }),
                ManifestEntry::MetaAnalysis {
                    cohorts: members,
                    label_column,
                } => {
                    let members = members
                        .iter()
                        .map(|m| {
                            cohorts.get(m.as_str()).cloned().ok_or_else(|| {
                                ReportError::Bundle(format!(
                                    "meta-analysis '{}' references '{}', which is not a cohort entry",
                                    key, m
                                ))
                            })
                        })
                        .collect::<ReportResult<Vec<_>>>()?;
                    Dataset::MetaAnalysis(MetaAnalysis {
                        name: key.clone(),
                        label_column: label_column.clone(),
                        cohorts: members,
                    })
                }
            };
            bundle.insert(key.clone(), dataset);
        }

        info!("Loaded bundle with {} entries", bundle.len());
        Ok(bundle)
    }
}

pub fn load_bundle(manifest_path: &Path) -> ReportResult<Bundle> {
    info!("Reading bundle manifest {}", manifest_path.display());
    let manifest = BundleManifest::from_path(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    manifest.load(base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fixture(dir: &Path, manifest: &str) -> PathBuf {
        fs::create_dir_all(dir.join("cohorts")).unwrap();
        fs::write(
            dir.join("cohorts/oka_expr.csv"),
            "gene,a,b,c,d\nCD274,5,6,1,2\nMYC,1,2,5,6\n",
        )
        .unwrap();
        fs::write(
            dir.join("cohorts/oka_pheno.csv"),
            "sample,group\na,1\nb,1\nc,0\nd,0\n",
        )
        .unwrap();
        let path = dir.join("bundle.json");
        fs::write(&path, manifest).unwrap();
        path
    }

    #[test]
    fn loads_all_kinds_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            r#"{
              "datasets": {
                "OKA": { "kind": "cohort", "expression": "cohorts/oka_expr.csv",
                         "pheno": "cohorts/oka_pheno.csv" },
                "filter": { "kind": "filter", "pos_genes": ["CD274"], "neg_genes": ["MYC"] },
                "training_bundle": { "kind": "meta_analysis", "cohorts": ["OKA"] }
              }
            }"#,
        );

        let bundle = load_bundle(&path).unwrap();
        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.cohort("OKA").unwrap().samples.len(), 4);
        assert_eq!(bundle.filter("filter").unwrap().neg_genes, vec!["MYC"]);
        let meta = bundle.meta_analysis("training_bundle").unwrap();
        assert_eq!(meta.label_column, "group");
        assert_eq!(meta.cohorts[0].name, "OKA");
    }

    #[test]
    fn unknown_cohort_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            r#"{ "datasets": {
                "filter": { "kind": "filter" },
                "training_bundle": { "kind": "meta_analysis", "cohorts": ["filter"] }
            } }"#,
        );
        assert!(matches!(load_bundle(&path), Err(ReportError::Bundle(_))));
    }

    #[test]
    fn malformed_manifest_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "{ not json");
        assert!(matches!(load_bundle(&path), Err(ReportError::Json(_))));
    }
}
