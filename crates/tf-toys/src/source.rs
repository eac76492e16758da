//! Toy source loading.
//!
//! A toy file carries the pre-generated events of one source and the generator parameters they
//! were produced with.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use tf_core::{Column, Error, EventTable, Result};

use crate::config::{DataSourceConfig, ToyFitConfig};
use crate::expr::Expression;
use crate::paths::Paths;
use crate::truth::TRUTH_META_COLUMNS;

/// `toy_info` keys that are bookkeeping rather than generator parameters.
pub const TRUTH_BOOKKEEPING_KEYS: [&str; 3] = ["seed", "jobid", "nevents"];

#[derive(Debug, Deserialize)]
struct ToyFile {
    data: BTreeMap<String, Column>,
    #[serde(default)]
    toy_info: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Read the events and generator truth of one toy file.
pub fn read_toy_file(path: &Path) -> Result<(EventTable, BTreeMap<String, f64>)> {
    if !path.exists() {
        return Err(Error::Input(format!("Cannot find toy file -> {}", path.display())));
    }
    let bytes = std::fs::read(path)?;
    let file: ToyFile = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Input(format!("invalid toy file {} -> {e}", path.display())))?;
    let table = EventTable::from_columns(file.data)
        .map_err(|e| Error::Input(format!("invalid toy file {} -> {e}", path.display())))?;
    let truth = match file.toy_info.first() {
        Some(record) => truth_from_record(record)
            .map_err(|e| Error::Input(format!("invalid toy file {} -> {e}", path.display())))?,
        None => {
            warn!(path = %path.display(), "toy file has no toy_info; no generator truth recorded");
            BTreeMap::new()
        }
    };
    Ok((table, truth))
}

fn truth_from_record(
    record: &serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<BTreeMap<String, f64>, String> {
    let truth: BTreeMap<String, f64> = record
        .iter()
        .filter(|(k, _)| !TRUTH_BOOKKEEPING_KEYS.contains(&k.as_str()))
        .filter_map(|(k, v)| v.as_f64().map(|x| (k.clone(), x)))
        .collect();
    if let Some(reserved) = truth.keys().find(|k| TRUTH_META_COLUMNS.contains(&k.as_str())) {
        return Err(format!("generator variable '{reserved}' clashes with a reserved truth column"));
    }
    Ok(truth)
}

/// One loaded toy source. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ToySource {
    id: String,
    reference: String,
    path: PathBuf,
    truth: BTreeMap<String, f64>,
    nevents: u64,
    category: Option<String>,
    selection: Option<String>,
    rows: EventTable,
}

impl ToySource {
    /// Load a configured source, applying its selection.
    pub fn load(config: &DataSourceConfig, paths: &Paths) -> Result<Self> {
        let path = paths.toy_path(&config.source);
        let (table, truth) = read_toy_file(&path)?;
        let rows = match &config.selection {
            Some(selection) => {
                let expr = Expression::compile(selection).map_err(|e| {
                    Error::config(format!("data/{}/selection -> {e}", config.id))
                })?;
                let mask = expr
                    .mask(&table)
                    .map_err(|e| Error::config(format!("data/{}/selection -> {e}", config.id)))?;
                let selected = table.filter(&mask)?;
                debug!(
                    source = %config.id,
                    selection = %selection,
                    before = table.n_rows(),
                    after = selected.n_rows(),
                    "applied selection"
                );
                selected
            }
            None => table,
        };
        if rows.n_rows() == 0 {
            return Err(Error::Input(format!(
                "toy source '{}' ({}) has no events{}",
                config.id,
                path.display(),
                if config.selection.is_some() { " after selection" } else { "" }
            )));
        }
        Ok(Self {
            id: config.id.clone(),
            reference: config.source.clone(),
            path,
            truth,
            nevents: config.nevents,
            category: config.category.clone(),
            selection: config.selection.clone(),
            rows,
        })
    }

    /// Build a source from in-memory rows.
    pub fn from_parts(
        id: impl Into<String>,
        rows: EventTable,
        truth: BTreeMap<String, f64>,
        nevents: u64,
        category: Option<String>,
    ) -> Self {
        let id = id.into();
        Self {
            reference: id.clone(),
            path: PathBuf::from(format!("{id}.json")),
            id,
            truth,
            nevents,
            category,
            selection: None,
            rows,
        }
    }

    /// Source identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured source reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Resolved toy file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generator truth (name -> value).
    pub fn truth(&self) -> &BTreeMap<String, f64> {
        &self.truth
    }

    /// Nominal number of events per trial.
    pub fn nevents(&self) -> u64 {
        self.nevents
    }

    /// Category label, if the source declares one.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Selection expression, if any.
    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Pool of rows available for sampling.
    pub fn rows(&self) -> &EventTable {
        &self.rows
    }
}

/// Load every configured source, in configured order.
pub fn load_sources(config: &ToyFitConfig, paths: &Paths) -> Result<Vec<ToySource>> {
    check_category_usage(&config.data)?;
    config.data.iter().map(|d| ToySource::load(d, paths)).collect()
}

/// Category labels must be declared by all sources or by none.
pub fn check_category_usage(data: &[DataSourceConfig]) -> Result<()> {
    let declared = data.iter().filter(|d| d.category.is_some()).count();
    if declared != 0 && declared != data.len() {
        return Err(Error::config("Categories in 'data' not consistently specified."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_toy(dir: &Path, name: &str, body: &str) {
        let toys = dir.join("toys");
        std::fs::create_dir_all(&toys).unwrap();
        std::fs::write(toys.join(format!("{name}.json")), body).unwrap();
    }

    fn source_config(selection: Option<&str>) -> DataSourceConfig {
        DataSourceConfig {
            id: "A".into(),
            source: "sig".into(),
            nevents: 10,
            category: None,
            selection: selection.map(str::to_string),
        }
    }

    const TOY: &str = r#"{
        "data": {"x": [1.0, 2.0, 3.0, 4.0], "tag": ["a", "b", "a", "b"]},
        "toy_info": [{"mu": 2.5, "sigma": 1.0, "seed": 17, "jobid": "123.pbs", "nevents": 4, "label": "sig"}]
    }"#;

    #[test]
    fn test_truth_skips_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        write_toy(dir.path(), "sig", TOY);
        let src = ToySource::load(&source_config(None), &Paths::new(dir.path())).unwrap();
        assert_eq!(src.rows().n_rows(), 4);
        let keys: Vec<&str> = src.truth().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["mu", "sigma"]);
        assert_eq!(src.truth()["mu"], 2.5);
        assert_eq!(src.rows().labels("tag").unwrap()[1], "b");
    }

    #[test]
    fn test_reserved_truth_name_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        write_toy(dir.path(), "sig", r#"{"data": {"x": [1.0]}, "toy_info": [{"mu": 1.0, "source": 2.0}]}"#);
        let err = ToySource::load(&source_config(None), &Paths::new(dir.path())).unwrap_err();
        assert_eq!(err.exit_status().code(), 2);
        assert!(err.to_string().contains("'source'"), "{err}");
    }

    #[test]
    fn test_selection_applied() {
        let dir = tempfile::tempdir().unwrap();
        write_toy(dir.path(), "sig", TOY);
        let src = ToySource::load(&source_config(Some("x > 1.5 && x < 4")), &Paths::new(dir.path()))
            .unwrap();
        assert_eq!(src.rows().float("x").unwrap(), &[2.0, 3.0]);
        assert_eq!(src.selection(), Some("x > 1.5 && x < 4"));
        assert_eq!(src.reference(), "sig");
    }

    #[test]
    fn test_empty_selection_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        write_toy(dir.path(), "sig", TOY);
        let err = ToySource::load(&source_config(Some("x > 100")), &Paths::new(dir.path())).unwrap_err();
        assert_eq!(err.exit_status().code(), 2);
    }

    #[test]
    fn test_bad_selection_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_toy(dir.path(), "sig", TOY);
        let err = ToySource::load(&source_config(Some("missing > 1")), &Paths::new(dir.path())).unwrap_err();
        assert_eq!(err.exit_status().code(), 1);
    }

    #[test]
    fn test_missing_toy_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToySource::load(&source_config(None), &Paths::new(dir.path())).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_mixed_category_usage() {
        let mut a = source_config(None);
        a.category = Some("sig".into());
        let b = source_config(None);
        assert!(check_category_usage(&[a.clone(), b.clone()]).is_err());
        assert!(check_category_usage(&[b.clone(), b]).is_ok());
        assert!(check_category_usage(&[a.clone(), a]).is_ok());
    }
}
