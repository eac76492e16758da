//! Configuration loading for toy fit runs.
//!
//! Several YAML (or JSON) files are deep-merged in order, required key paths are validated
//! on the merged document, and the recognized sections are parsed into [`ToyFitConfig`].
//! Model sections stay untyped here; they are interpreted by [`crate::models`].

use serde::Deserialize;
use serde_yaml_ng::{Mapping, Value};
use std::path::{Path, PathBuf};

use tf_core::{Error, Result};

/// Key paths every toy fit configuration must define.
pub const REQUIRED_KEYS: [&str; 3] = ["fit/nfits", "name", "data"];

/// Read one configuration file (YAML, or JSON when the extension is `.json`).
pub fn read_config_file(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(Error::Input(format!("Cannot load configuration file: {}", path.display())));
    }
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let value: Value = if ext == "json" {
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::config(format!("JSON parsing error in {} -> {e}", path.display())))?
    } else {
        serde_yaml_ng::from_slice(&bytes)
            .map_err(|e| Error::config(format!("YAML parsing error in {} -> {e}", path.display())))?
    };
    Ok(value)
}

/// Recursively merge `overlay` into `base`; overlay values win.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(b), Value::Mapping(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Look up a `/`-separated key path.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/').try_fold(value, |node, key| node.as_mapping()?.get(key))
}

/// Check that every key path is present and non-null.
pub fn validate(value: &Value, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|k| get_path(value, k).is_none_or(Value::is_null))
        .map(|k| k.to_string())
        .collect();
    if missing.is_empty() { Ok(()) } else { Err(Error::missing_keys(missing)) }
}

/// Load, merge and validate configuration files.
pub fn load_config(files: &[PathBuf]) -> Result<Value> {
    if files.is_empty() {
        return Err(Error::Input("no configuration files given".into()));
    }
    let mut merged = Value::Mapping(Mapping::new());
    for file in files {
        let value = read_config_file(file)?;
        if !value.is_mapping() {
            return Err(Error::config(format!(
                "configuration file {} must contain a mapping",
                file.display()
            )));
        }
        merge(&mut merged, value);
    }
    validate(&merged, &REQUIRED_KEYS)?;
    Ok(merged)
}

fn default_models() -> Vec<String> {
    vec!["model".to_string()]
}

fn default_strategies() -> Vec<String> {
    vec!["simple".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_bootstrap_replicas() -> usize {
    200
}

/// The `fit` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FitSection {
    /// Total number of sample/fit sequences.
    pub nfits: usize,
    /// Number of sequences of one batch job; overrides `nfits` for the trial count.
    #[serde(default)]
    pub nfits_per_job: Option<usize>,
    /// Model section names, fitted in this order.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Fit strategy names, applied in this order.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    /// Extended fits.
    #[serde(default = "default_true")]
    pub extended: bool,
    /// Asymmetric errors.
    #[serde(default = "default_true")]
    pub minos: bool,
    /// Replica count of the `bootstrap` strategy.
    #[serde(default = "default_bootstrap_replicas")]
    pub bootstrap_replicas: usize,
}

/// One entry of the `data` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceConfig {
    /// Source identifier (key under `data`).
    pub id: String,
    /// Toy reference.
    pub source: String,
    /// Nominal number of events per trial.
    pub nevents: u64,
    /// Category label attached to every sampled row.
    pub category: Option<String>,
    /// Row selection expression.
    pub selection: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDataSource {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    nevents: Option<u64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    selection: Option<String>,
}

/// The `acceptance` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcceptanceConfig {
    /// Per-event efficiency expression, clamped to `[0, 1]`.
    pub efficiency: String,
    /// Efficiency maximum used to normalize accept-reject probabilities.
    #[serde(default = "default_efficiency_max")]
    pub max: f64,
}

fn default_efficiency_max() -> f64 {
    1.0
}

/// Parsed toy fit configuration.
#[derive(Debug, Clone)]
pub struct ToyFitConfig {
    /// Output target name.
    pub name: String,
    /// Fit settings.
    pub fit: FitSection,
    /// Data sources in configured order.
    pub data: Vec<DataSourceConfig>,
    /// Acceptance settings.
    pub acceptance: Option<AcceptanceConfig>,
    /// Alternate storage location for the output.
    pub link_from: Option<PathBuf>,
    raw: Value,
}

impl ToyFitConfig {
    /// Load configuration files and parse them.
    pub fn load(files: &[PathBuf]) -> Result<Self> {
        Self::from_value(load_config(files)?)
    }

    /// Parse a merged configuration document.
    pub fn from_value(raw: Value) -> Result<Self> {
        validate(&raw, &REQUIRED_KEYS)?;

        let name = get_path(&raw, "name")
            .and_then(scalar_to_string)
            .ok_or_else(|| Error::config("'name' must be a string"))?;

        let fit_value = get_path(&raw, "fit").cloned().unwrap_or(Value::Null);
        let fit: FitSection = serde_yaml_ng::from_value(fit_value)
            .map_err(|e| Error::config(format!("invalid 'fit' section -> {e}")))?;
        if fit.models.is_empty() {
            return Err(Error::config("No model was specified in the config file!"));
        }
        if fit.strategies.is_empty() {
            return Err(Error::config("Empty fit strategies were specified in the config file!"));
        }
        if fit.nfits_per_job == Some(0) || (fit.nfits_per_job.is_none() && fit.nfits == 0) {
            return Err(Error::config("number of fits must be positive"));
        }

        let data = parse_data_section(&raw)?;

        let acceptance = match get_path(&raw, "acceptance") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_yaml_ng::from_value::<AcceptanceConfig>(v.clone())
                    .map_err(|e| Error::config(format!("Error loading acceptance -> {e}")))?,
            ),
        };

        let link_from = get_path(&raw, "link-from").and_then(Value::as_str).map(PathBuf::from);

        let config = Self { name, fit, data, acceptance, link_from, raw };
        for model in &config.fit.models {
            config.model_section(model)?;
        }
        Ok(config)
    }

    /// Number of sample/fit sequences this job runs.
    pub fn n_trials(&self) -> usize {
        self.fit.nfits_per_job.unwrap_or(self.fit.nfits)
    }

    /// Raw definition of a model section.
    pub fn model_section(&self, model: &str) -> Result<&Value> {
        match get_path(&self.raw, model) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(Error::Config {
                message: format!("Missing model configuration -> {model}"),
                missing_keys: vec![model.to_string()],
            }),
        }
    }

    /// Whether the sources declare categories (uniform across sources by construction).
    pub fn uses_categories(&self) -> bool {
        self.data.first().is_some_and(|d| d.category.is_some())
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_data_section(raw: &Value) -> Result<Vec<DataSourceConfig>> {
    let mapping = get_path(raw, "data")
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::config("'data' must be a mapping of source id -> source"))?;
    if mapping.is_empty() {
        return Err(Error::config("No input data specified in the config file!"));
    }

    let mut out = Vec::with_capacity(mapping.len());
    let mut missing = Vec::new();
    for (key, value) in mapping {
        let id = scalar_to_string(key)
            .ok_or_else(|| Error::config("data source ids must be strings"))?;
        let entry: RawDataSource = serde_yaml_ng::from_value(value.clone())
            .map_err(|e| Error::config(format!("invalid data source '{id}' -> {e}")))?;
        if entry.source.is_none() {
            missing.push(format!("data/{id}/source"));
        }
        if entry.nevents.is_none() {
            missing.push(format!("data/{id}/nevents"));
        }
        if let (Some(source), Some(nevents)) = (entry.source, entry.nevents) {
            out.push(DataSourceConfig {
                id,
                source,
                nevents,
                category: entry.category,
                selection: entry.selection,
            });
        }
    }
    if !missing.is_empty() {
        return Err(Error::missing_keys(missing));
    }

    crate::source::check_category_usage(&out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Value {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    const BASE: &str = r#"
name: bias-study
fit:
  nfits: 50
data:
  sig:
    source: sig_toys
    nevents: 100
model:
  pdf: gaussian
  observable: x
"#;

    #[test]
    fn test_defaults() {
        let cfg = ToyFitConfig::from_value(parse(BASE)).unwrap();
        assert_eq!(cfg.name, "bias-study");
        assert_eq!(cfg.n_trials(), 50);
        assert_eq!(cfg.fit.models, vec!["model"]);
        assert_eq!(cfg.fit.strategies, vec!["simple"]);
        assert!(cfg.fit.extended && cfg.fit.minos);
        assert_eq!(cfg.data.len(), 1);
        assert_eq!(cfg.data[0].nevents, 100);
        assert!(cfg.acceptance.is_none());
        assert!(!cfg.uses_categories());
    }

    #[test]
    fn test_missing_required_keys_reported_together() {
        let err = ToyFitConfig::from_value(parse("fit:\n  strategies: [simple]\n")).unwrap_err();
        match err {
            Error::Config { missing_keys, .. } => {
                assert_eq!(missing_keys, vec!["fit/nfits", "name", "data"]);
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_source_keys() {
        let yaml = "name: a\nfit: {nfits: 3}\ndata:\n  A: {source: a}\nmodel: {pdf: gaussian, observable: x}\n";
        match ToyFitConfig::from_value(parse(yaml)).unwrap_err() {
            Error::Config { missing_keys, .. } => assert_eq!(missing_keys, vec!["data/A/nevents"]),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_categories_rejected() {
        let yaml = r#"
name: a
fit: {nfits: 3}
data:
  A: {source: a, nevents: 10, category: sig}
  B: {source: b, nevents: 10}
model: {pdf: gaussian, observable: x}
"#;
        let err = ToyFitConfig::from_value(parse(yaml)).unwrap_err();
        assert_eq!(err.exit_status().code(), 1);
        assert!(err.to_string().contains("not consistently specified"));
    }

    #[test]
    fn test_missing_model_section() {
        let yaml = "name: a\nfit: {nfits: 3, models: [other]}\ndata:\n  A: {source: a, nevents: 1}\n";
        let err = ToyFitConfig::from_value(parse(yaml)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_merge_overrides_nested_keys() {
        let mut base = parse(BASE);
        merge(&mut base, parse("fit:\n  nfits-per-job: 10\n  strategies: [simple, bootstrap]\n"));
        let cfg = ToyFitConfig::from_value(base).unwrap();
        assert_eq!(cfg.fit.nfits, 50);
        assert_eq!(cfg.n_trials(), 10);
        assert_eq!(cfg.fit.strategies, vec!["simple", "bootstrap"]);
    }

    #[test]
    fn test_data_order_preserved() {
        let yaml = r#"
name: a
fit: {nfits: 1}
data:
  zeta: {source: z, nevents: 1, category: z}
  alpha: {source: a, nevents: 2, category: a}
model: {pdf: gaussian, observable: x}
"#;
        let cfg = ToyFitConfig::from_value(parse(yaml)).unwrap();
        let ids: Vec<&str> = cfg.data.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert!(cfg.uses_categories());
    }

    #[test]
    fn test_load_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yml");
        let b = dir.path().join("b.json");
        std::fs::write(&a, BASE).unwrap();
        std::fs::write(&b, r#"{"name": "override", "link-from": "/scratch"}"#).unwrap();
        let cfg = ToyFitConfig::load(&[a.clone(), b]).unwrap();
        assert_eq!(cfg.name, "override");
        assert_eq!(cfg.link_from, Some(PathBuf::from("/scratch")));

        let err = ToyFitConfig::load(&[dir.path().join("nope.yml")]).unwrap_err();
        assert_eq!(err.exit_status().code(), 2);
    }
}
