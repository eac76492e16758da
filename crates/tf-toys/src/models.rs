//! Built-in fit models.
//!
//! The models here are closed-form weighted maximum-likelihood estimators. They exist so that a
//! toy study can run end to end; the trial loop only sees them through [`FitModel`].
//!
//! A model section looks like:
//!
//! ```yaml
//! model:
//!   pdf: gaussian
//!   observable: mass
//!   parameters: {mu: mass_mean}
//! ```

use serde::Deserialize;
use serde_yaml_ng::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use tracing::debug;

use tf_core::{CATEGORY_COLUMN, Error, EventTable, FitModel, FitOptions, FitResult, ModelDataset, Result, WEIGHT_COLUMN};

fn default_category_var() -> String {
    CATEGORY_COLUMN.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "pdf", rename_all = "lowercase")]
enum ModelSpec {
    Gaussian {
        observable: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    Exponential {
        observable: String,
        #[serde(default)]
        lower: f64,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    Simultaneous {
        #[serde(rename = "category-var", default = "default_category_var")]
        category_var: String,
        categories: BTreeMap<String, ModelSpec>,
    },
}

/// Build the model defined by configuration section `name`.
pub fn build_model(name: &str, section: &Value) -> Result<Box<dyn FitModel>> {
    let spec: ModelSpec = serde_yaml_ng::from_value(section.clone())
        .map_err(|e| Error::ModelConfig(format!("model '{name}' -> {e}")))?;
    from_spec(name, spec, true)
}

fn from_spec(name: &str, spec: ModelSpec, top_level: bool) -> Result<Box<dyn FitModel>> {
    Ok(match spec {
        ModelSpec::Gaussian { observable, parameters } => {
            let names = rename_parameters(name, &GaussianModel::CANONICAL, &parameters)?;
            Box::new(GaussianModel { observable, names })
        }
        ModelSpec::Exponential { observable, lower, parameters } => {
            if !lower.is_finite() {
                return Err(Error::ModelConfig(format!("model '{name}': 'lower' must be finite")));
            }
            let names = rename_parameters(name, &ExponentialModel::CANONICAL, &parameters)?;
            Box::new(ExponentialModel { observable, lower, names })
        }
        ModelSpec::Simultaneous { category_var, categories } => {
            if !top_level {
                return Err(Error::ModelConfig(format!(
                    "model '{name}': simultaneous models cannot be nested"
                )));
            }
            if categories.is_empty() {
                return Err(Error::ModelConfig(format!("model '{name}': no categories defined")));
            }
            let components = categories
                .into_iter()
                .map(|(label, sub)| {
                    let model = from_spec(&format!("{name}/{label}"), sub, false)?;
                    Ok((label, model))
                })
                .collect::<Result<Vec<_>>>()?;
            Box::new(SimultaneousModel { category_var, components })
        }
    })
}

fn rename_parameters(
    model: &str,
    canonical: &[&str],
    renames: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    if let Some(unknown) = renames.keys().find(|k| !canonical.contains(&k.as_str())) {
        return Err(Error::ModelConfig(format!(
            "model '{model}': unknown parameter '{unknown}' (expected one of {})",
            canonical.join(", ")
        )));
    }
    let names: Vec<String> = canonical
        .iter()
        .map(|c| renames.get(*c).cloned().unwrap_or_else(|| c.to_string()))
        .collect();
    let unique: BTreeSet<&String> = names.iter().collect();
    if unique.len() != names.len() {
        return Err(Error::ModelConfig(format!("model '{model}': duplicate parameter names")));
    }
    Ok(names)
}

/// Columns kept by a single-observable model: the observable plus weight and category
/// bookkeeping when present.
fn keep_columns(table: &EventTable, observables: &[String]) -> Result<EventTable> {
    let mut names: Vec<&str> = observables.iter().map(String::as_str).collect();
    for extra in [WEIGHT_COLUMN, CATEGORY_COLUMN] {
        if table.has_column(extra) && !names.contains(&extra) {
            names.push(extra);
        }
    }
    table.select(&names)
}

/// Weighted sums over an observable.
struct Moments {
    sw: f64,
    sw2: f64,
    mean: f64,
    var: f64,
}

impl Moments {
    fn of(dataset: &ModelDataset, observable: &str, shift: f64) -> Result<Self> {
        let xs = dataset.table().float(observable).ok_or_else(|| {
            Error::Validation(format!("dataset '{}': missing column '{observable}'", dataset.name()))
        })?;
        let (sw, sw2) = dataset.weight_sums();
        let mut swx = 0.0;
        for (i, x) in xs.iter().enumerate() {
            swx += dataset.weight(i) * (x - shift);
        }
        let mean = if sw > 0.0 { swx / sw } else { f64::NAN };
        let mut swd = 0.0;
        for (i, x) in xs.iter().enumerate() {
            let d = x - shift - mean;
            swd += dataset.weight(i) * d * d;
        }
        let var = if sw > 0.0 { swd / sw } else { f64::NAN };
        Ok(Self { sw, sw2, mean, var })
    }

    /// Kish effective sample size.
    fn n_eff(&self) -> f64 {
        if self.sw2 > 0.0 { self.sw * self.sw / self.sw2 } else { 0.0 }
    }

    /// Extended term of the negative log-likelihood at `yield = sw`.
    fn extended_nll(&self) -> f64 {
        self.sw - self.sw * self.sw.ln()
    }
}

/// Gaussian in one observable; parameters `mu`, `sigma` and (extended) `yield`.
#[derive(Debug, Clone)]
pub struct GaussianModel {
    observable: String,
    names: Vec<String>,
}

impl GaussianModel {
    const CANONICAL: [&'static str; 3] = ["mu", "sigma", "yield"];

    /// Gaussian in `observable` with canonical parameter names.
    pub fn new(observable: impl Into<String>) -> Self {
        Self { observable: observable.into(), names: Self::CANONICAL.iter().map(|s| s.to_string()).collect() }
    }
}

impl FitModel for GaussianModel {
    fn kind(&self) -> &str {
        "gaussian"
    }

    fn observables(&self) -> Vec<String> {
        vec![self.observable.clone()]
    }

    fn transform(&self, table: &EventTable) -> Result<EventTable> {
        keep_columns(table, &self.observables())
    }

    fn parameter_names(&self, extended: bool) -> Vec<String> {
        let n = if extended { 3 } else { 2 };
        self.names[..n].to_vec()
    }

    fn estimate(&self, dataset: &ModelDataset, options: &FitOptions) -> Result<FitResult> {
        let names = self.parameter_names(options.extended);
        let m = Moments::of(dataset, &self.observable, 0.0)?;
        let n_eff = m.n_eff();
        if n_eff < 2.0 || !(m.var.is_finite() && m.var > 0.0) {
            return Ok(FitResult::failed(names, 1));
        }
        let sigma = m.var.sqrt();
        let mut values = vec![m.mean, sigma];
        let mut errors = vec![sigma / n_eff.sqrt(), sigma / (2.0 * n_eff).sqrt()];
        let mut nll = m.sw * (0.5 * (2.0 * PI * m.var).ln() + 0.5);
        if options.extended {
            values.push(m.sw);
            errors.push(m.sw2.sqrt());
            nll += m.extended_nll();
        }
        if options.verbose {
            debug!(dataset = %dataset.name(), mu = m.mean, sigma, n_eff, "gaussian estimate");
        }
        Ok(FitResult::new(names, values, errors, nll, 0).with_diagonal_covariance())
    }
}

/// Exponential decay above `lower`; parameters `tau` and (extended) `yield`.
#[derive(Debug, Clone)]
pub struct ExponentialModel {
    observable: String,
    lower: f64,
    names: Vec<String>,
}

impl ExponentialModel {
    const CANONICAL: [&'static str; 2] = ["tau", "yield"];

    /// Exponential in `observable` starting at `lower`.
    pub fn new(observable: impl Into<String>, lower: f64) -> Self {
        Self {
            observable: observable.into(),
            lower,
            names: Self::CANONICAL.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FitModel for ExponentialModel {
    fn kind(&self) -> &str {
        "exponential"
    }

    fn observables(&self) -> Vec<String> {
        vec![self.observable.clone()]
    }

    fn transform(&self, table: &EventTable) -> Result<EventTable> {
        let kept = keep_columns(table, &self.observables())?;
        let Some(xs) = kept.float(&self.observable) else {
            return Err(Error::Validation(format!("observable '{}' is not numeric", self.observable)));
        };
        let mask: Vec<bool> = xs.iter().map(|x| *x >= self.lower).collect();
        kept.filter(&mask)
    }

    fn parameter_names(&self, extended: bool) -> Vec<String> {
        let n = if extended { 2 } else { 1 };
        self.names[..n].to_vec()
    }

    fn estimate(&self, dataset: &ModelDataset, options: &FitOptions) -> Result<FitResult> {
        let names = self.parameter_names(options.extended);
        let m = Moments::of(dataset, &self.observable, self.lower)?;
        let n_eff = m.n_eff();
        if n_eff < 2.0 || !(m.mean.is_finite() && m.mean > 0.0) {
            return Ok(FitResult::failed(names, 1));
        }
        let tau = m.mean;
        let mut values = vec![tau];
        let mut errors = vec![tau / n_eff.sqrt()];
        let mut nll = m.sw * (tau.ln() + 1.0);
        if options.extended {
            values.push(m.sw);
            errors.push(m.sw2.sqrt());
            nll += m.extended_nll();
        }
        if options.verbose {
            debug!(dataset = %dataset.name(), tau, n_eff, "exponential estimate");
        }
        Ok(FitResult::new(names, values, errors, nll, 0).with_diagonal_covariance())
    }
}

/// Independent sub-models per category label, fitted simultaneously.
///
/// Parameters are prefixed with `<label>_`; the covariance is block-diagonal.
pub struct SimultaneousModel {
    category_var: String,
    components: Vec<(String, Box<dyn FitModel>)>,
}

impl SimultaneousModel {
    /// Simultaneous model over `category_var` with one component per label.
    pub fn new(category_var: impl Into<String>, components: Vec<(String, Box<dyn FitModel>)>) -> Self {
        Self { category_var: category_var.into(), components }
    }
}

impl FitModel for SimultaneousModel {
    fn kind(&self) -> &str {
        "simultaneous"
    }

    fn observables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, model) in &self.components {
            for obs in model.observables() {
                if !out.contains(&obs) {
                    out.push(obs);
                }
            }
        }
        out
    }

    fn transform(&self, table: &EventTable) -> Result<EventTable> {
        let mut names = self.observables();
        names.push(self.category_var.clone());
        if table.has_column(WEIGHT_COLUMN) {
            names.push(WEIGHT_COLUMN.to_string());
        }
        names.dedup();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        table.select(&refs)
    }

    fn category_variables(&self) -> BTreeSet<String> {
        BTreeSet::from([self.category_var.clone()])
    }

    fn parameter_names(&self, extended: bool) -> Vec<String> {
        self.components
            .iter()
            .flat_map(|(label, model)| {
                model.parameter_names(extended).into_iter().map(move |p| format!("{label}_{p}"))
            })
            .collect()
    }

    fn estimate(&self, dataset: &ModelDataset, options: &FitOptions) -> Result<FitResult> {
        let names = self.parameter_names(options.extended);
        let n = names.len();
        let mut values = Vec::with_capacity(n);
        let mut errors = Vec::with_capacity(n);
        let mut cov = vec![0.0; n * n];
        let mut nll = 0.0;
        let mut status = 0;
        let mut offset = 0;
        for (label, model) in &self.components {
            let subset = dataset.category_subset(&self.category_var, label)?;
            let sub = model.transform(subset.table()).and_then(|t| {
                ModelDataset::new(
                    subset.name(),
                    t,
                    subset.weight_var().map(str::to_string),
                    model.category_variables(),
                )
            })?;
            let r = model.estimate(&sub, options)?;
            let k = r.parameters.len();
            let block = match &r.covariance {
                Some(c) if c.len() == k * k => c.clone(),
                _ => r.clone().with_diagonal_covariance().covariance.unwrap_or_default(),
            };
            for i in 0..k {
                for j in 0..k {
                    cov[(offset + i) * n + offset + j] = block[i * k + j];
                }
            }
            values.extend_from_slice(&r.parameters);
            errors.extend_from_slice(&r.uncertainties);
            nll += r.nll;
            status = status.max(r.status);
            offset += k;
        }
        Ok(FitResult::new(names, values, errors, nll, status).with_covariance(cov))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tf_core::Column;

    fn dataset(xs: Vec<f64>, weights: Option<Vec<f64>>, labels: Option<Vec<&str>>) -> ModelDataset {
        let mut cols = vec![("x".to_string(), Column::Float(xs))];
        let weighted = weights.is_some();
        if let Some(w) = weights {
            cols.push((WEIGHT_COLUMN.to_string(), Column::Float(w)));
        }
        let mut cats = BTreeSet::new();
        if let Some(l) = labels {
            cols.push((CATEGORY_COLUMN.to_string(), Column::Label(l.into_iter().map(String::from).collect())));
            cats.insert(CATEGORY_COLUMN.to_string());
        }
        let table = EventTable::from_columns(cols).unwrap();
        ModelDataset::new("data_m", table, weighted.then(|| WEIGHT_COLUMN.to_string()), cats).unwrap()
    }

    fn section(yaml: &str) -> Value {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_gaussian_moments() {
        let model = GaussianModel::new("x");
        let ds = dataset(vec![1.0, 2.0, 3.0, 4.0], None, None);
        let r = model.estimate(&ds, &FitOptions::default()).unwrap();
        assert_eq!(r.names, vec!["mu", "sigma", "yield"]);
        assert_relative_eq!(r.parameters[0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(r.parameters[1], 1.25f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(r.parameters[2], 4.0, epsilon = 1e-12);
        assert_relative_eq!(r.uncertainties[0], 1.25f64.sqrt() / 2.0, epsilon = 1e-12);
        assert_relative_eq!(r.uncertainties[2], 2.0, epsilon = 1e-12);
        assert_eq!(r.covariance.as_ref().unwrap().len(), 9);
        assert_eq!(r.status, 0);
    }

    #[test]
    fn test_gaussian_weighted_and_not_extended() {
        let model = GaussianModel::new("x");
        let ds = dataset(vec![0.0, 10.0, 10.0], Some(vec![2.0, 1.0, 1.0]), None);
        let opts = FitOptions { extended: false, ..FitOptions::default() };
        let r = model.estimate(&ds, &opts).unwrap();
        assert_eq!(r.names, vec!["mu", "sigma"]);
        assert_relative_eq!(r.parameters[0], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_too_few_events_is_failed_status() {
        let model = GaussianModel::new("x");
        let r = model.estimate(&dataset(vec![1.0], None, None), &FitOptions::default()).unwrap();
        assert_eq!(r.status, 1);
        assert!(r.parameters.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_exponential_shifted_mean() {
        let model = ExponentialModel::new("x", 1.0);
        let table = EventTable::from_columns(vec![("x".to_string(), Column::Float(vec![0.5, 2.0, 3.0, 4.0]))]).unwrap();
        let kept = model.transform(&table).unwrap();
        assert_eq!(kept.n_rows(), 3);
        let ds = ModelDataset::new("d", kept, None, BTreeSet::new()).unwrap();
        let r = model.estimate(&ds, &FitOptions::default()).unwrap();
        assert_relative_eq!(r.parameters[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(r.parameters[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_build_from_config_with_renames() {
        let model = build_model("m", &section("pdf: gaussian\nobservable: x\nparameters: {mu: x_mean}\n")).unwrap();
        assert_eq!(model.kind(), "gaussian");
        assert_eq!(model.parameter_names(true), vec!["x_mean", "sigma", "yield"]);
    }

    #[test]
    fn test_invalid_definitions_are_model_config_errors() {
        for yaml in [
            "pdf: landau\nobservable: x\n",
            "observable: x\n",
            "pdf: gaussian\nobservable: x\nparameters: {tau: t}\n",
            "pdf: gaussian\nobservable: x\nparameters: {mu: sigma}\n",
            "pdf: simultaneous\ncategories: {}\n",
            "pdf: simultaneous\ncategories:\n  a: {pdf: simultaneous, categories: {b: {pdf: gaussian, observable: x}}}\n",
        ] {
            let err = build_model("m", &section(yaml)).err().unwrap();
            assert_eq!(err.exit_status().code(), 3, "{yaml}");
        }
    }

    #[test]
    fn test_simultaneous_block_diagonal() {
        let model = build_model(
            "m",
            &section(
                "pdf: simultaneous\ncategories:\n  sig: {pdf: gaussian, observable: x}\n  bkg: {pdf: exponential, observable: x}\n",
            ),
        )
        .unwrap();
        assert_eq!(model.category_variables(), BTreeSet::from([CATEGORY_COLUMN.to_string()]));
        assert_eq!(
            model.parameter_names(true),
            vec!["bkg_tau", "bkg_yield", "sig_mu", "sig_sigma", "sig_yield"]
        );

        let ds = dataset(
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 10.5, 11.0],
            None,
            Some(vec!["bkg", "bkg", "bkg", "bkg", "sig", "sig", "sig"]),
        );
        let r = model.estimate(&ds, &FitOptions::default()).unwrap();
        assert_eq!(r.status, 0);
        assert_relative_eq!(r.parameters[0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(r.parameters[2], 10.5, epsilon = 1e-12);
        let cov = r.covariance.unwrap();
        assert_eq!(cov.len(), 25);
        assert_eq!(cov[2], 0.0);
        assert!(cov[2 * 5 + 2] > 0.0);
    }
}
