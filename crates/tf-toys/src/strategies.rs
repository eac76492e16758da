//! Built-in fit strategies and name-based strategy resolution.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tf_core::{Error, FitModel, FitOptions, FitOutcome, FitResult, FitStrategy, ModelDataset, Result};

/// Quantile of the standard normal at -1 sigma.
pub const ONE_SIGMA_LOW: f64 = 0.158_655_253_931_457;
/// Quantile of the standard normal at +1 sigma.
pub const ONE_SIGMA_HIGH: f64 = 0.841_344_746_068_543;

/// Single estimate with the model's own covariance.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFit;

impl FitStrategy for SimpleFit {
    fn name(&self) -> &str {
        "simple"
    }

    fn fit(
        &self,
        model: &dyn FitModel,
        dataset: &ModelDataset,
        options: &FitOptions,
    ) -> Result<Box<dyn FitOutcome>> {
        let mut result = model.estimate(dataset, options)?;
        if result.covariance.is_none() {
            result = result.with_diagonal_covariance();
        }
        Ok(Box::new(result))
    }
}

/// Nominal estimate with uncertainties from bootstrap replicas of the dataset.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapFit {
    replicas: usize,
}

impl BootstrapFit {
    /// Bootstrap with `replicas` resampled datasets.
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }
}

impl FitStrategy for BootstrapFit {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn fit(
        &self,
        model: &dyn FitModel,
        dataset: &ModelDataset,
        options: &FitOptions,
    ) -> Result<Box<dyn FitOutcome>> {
        let nominal = model.estimate(dataset, options)?;
        if nominal.status != 0 {
            return Ok(Box::new(nominal));
        }

        let n = dataset.n_events();
        let k = nominal.parameters.len();
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut samples: Vec<Vec<f64>> = Vec::with_capacity(self.replicas);
        let mut indices = vec![0usize; n];
        for _ in 0..self.replicas {
            for slot in indices.iter_mut() {
                *slot = rng.random_range(0..n);
            }
            let replica = dataset.resample(&indices)?;
            let r = model.estimate(&replica, options)?;
            if r.status == 0 && r.parameters.len() == k && r.parameters.iter().all(|v| v.is_finite()) {
                samples.push(r.parameters);
            }
        }
        if options.verbose {
            debug!(dataset = %dataset.name(), replicas = self.replicas, accepted = samples.len(), "bootstrap replicas");
        }

        if samples.len() < 2 {
            let FitResult { names, parameters, uncertainties, covariance, nll, .. } = nominal;
            let mut out = FitResult::new(names, parameters, uncertainties, nll, 2);
            out.covariance = covariance;
            return Ok(Box::new(out));
        }

        let cov = sample_covariance(&samples, k);
        let errors: Vec<f64> = (0..k).map(|i| cov[i * k + i].sqrt()).collect();
        let mut out = FitResult::new(nominal.names, nominal.parameters, errors, nominal.nll, 0);
        if options.minos {
            let asym: Vec<(f64, f64)> = (0..k)
                .map(|i| {
                    let column: Vec<f64> = samples.iter().map(|s| s[i]).collect();
                    let v = out.parameters[i];
                    let lo = quantile_linear(&column, ONE_SIGMA_LOW) - v;
                    let hi = quantile_linear(&column, ONE_SIGMA_HIGH) - v;
                    (lo.min(0.0), hi.max(0.0))
                })
                .collect();
            out.asymmetric = Some(asym);
        }
        Ok(Box::new(out.with_covariance(cov)))
    }
}

/// Unbiased sample covariance (row-major, `k x k`) of equally long samples.
pub fn sample_covariance(samples: &[Vec<f64>], k: usize) -> Vec<f64> {
    let n = samples.len() as f64;
    let means: Vec<f64> = (0..k).map(|i| samples.iter().map(|s| s[i]).sum::<f64>() / n).collect();
    let mut cov = vec![0.0; k * k];
    for s in samples {
        for i in 0..k {
            for j in 0..k {
                cov[i * k + j] += (s[i] - means[i]) * (s[j] - means[j]);
            }
        }
    }
    for c in cov.iter_mut() {
        *c /= n - 1.0;
    }
    cov
}

/// Quantile of `sorted` data via linear interpolation.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Quantile via sorting + linear interpolation.
pub fn quantile_linear(data: &[f64], q: f64) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    quantile_linear_sorted(&v, q)
}

/// Resolve a strategy by its configured name.
pub fn resolve_strategy(name: &str, bootstrap_replicas: usize) -> Result<Box<dyn FitStrategy>> {
    match name {
        "simple" => Ok(Box::new(SimpleFit)),
        "bootstrap" => {
            if bootstrap_replicas < 2 {
                return Err(Error::ModelConfig(format!(
                    "fit strategy 'bootstrap' needs at least 2 replicas, got {bootstrap_replicas}"
                )));
            }
            Ok(Box::new(BootstrapFit::new(bootstrap_replicas)))
        }
        other => Err(Error::ModelConfig(format!(
            "Cannot find fit strategy -> {other} (available: simple, bootstrap)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GaussianModel;
    use approx::assert_relative_eq;
    use std::collections::BTreeSet;
    use tf_core::{Column, EventTable};

    fn dataset(xs: Vec<f64>) -> ModelDataset {
        let table = EventTable::from_columns(vec![("x".to_string(), Column::Float(xs))]).unwrap();
        ModelDataset::new("data_m", table, None, BTreeSet::new()).unwrap()
    }

    fn spread(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 37) % 101) as f64 / 10.0).collect()
    }

    #[test]
    fn test_resolve_strategy() {
        assert_eq!(resolve_strategy("simple", 200).unwrap().name(), "simple");
        assert_eq!(resolve_strategy("bootstrap", 200).unwrap().name(), "bootstrap");
        let err = resolve_strategy("migrad", 200).err().unwrap();
        assert_eq!(err.exit_status().code(), 3);
        assert!(resolve_strategy("bootstrap", 1).is_err());
    }

    #[test]
    fn test_simple_matches_model_estimate() {
        let model = GaussianModel::new("x");
        let ds = dataset(spread(50));
        let opts = FitOptions::default();
        let outcome = SimpleFit.fit(&model, &ds, &opts).unwrap();
        let direct = model.estimate(&ds, &opts).unwrap();
        assert_eq!(outcome.values(), direct.parameters.as_slice());
        assert_eq!(outcome.covariance().unwrap().len(), 9);
        assert!(outcome.asymmetric_errors().is_none());
    }

    #[test]
    fn test_bootstrap_errors_close_to_analytic() {
        let model = GaussianModel::new("x");
        let ds = dataset(spread(400));
        let opts = FitOptions { seed: 7, ..FitOptions::default() };
        let outcome = BootstrapFit::new(300).fit(&model, &ds, &opts).unwrap();
        assert_eq!(outcome.status(), 0);
        let analytic = model.estimate(&ds, &opts).unwrap();
        let ratio = outcome.uncertainties()[0] / analytic.uncertainties[0];
        assert!((0.7..1.3).contains(&ratio), "ratio = {ratio}");
        let asym = outcome.asymmetric_errors().unwrap();
        assert!(asym[0].0 < 0.0 && asym[0].1 > 0.0);
        assert_eq!(outcome.values(), analytic.parameters.as_slice());
    }

    #[test]
    fn test_bootstrap_is_deterministic_for_a_seed() {
        let model = GaussianModel::new("x");
        let ds = dataset(spread(60));
        let opts = FitOptions { seed: 99, minos: false, ..FitOptions::default() };
        let a = BootstrapFit::new(20).fit(&model, &ds, &opts).unwrap();
        let b = BootstrapFit::new(20).fit(&model, &ds, &opts).unwrap();
        assert_eq!(a.uncertainties(), b.uncertainties());
        assert!(a.asymmetric_errors().is_none());
    }

    #[test]
    fn test_bootstrap_propagates_failed_nominal() {
        let model = GaussianModel::new("x");
        let outcome = BootstrapFit::new(10).fit(&model, &dataset(vec![1.0]), &FitOptions::default()).unwrap();
        assert_eq!(outcome.status(), 1);
    }

    #[test]
    fn test_sample_covariance_and_quantiles() {
        let samples = vec![vec![1.0, 2.0], vec![3.0, 6.0]];
        let cov = sample_covariance(&samples, 2);
        assert_relative_eq!(cov[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(cov[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(cov[3], 8.0, epsilon = 1e-12);

        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(quantile_linear_sorted(&s, 0.25), 2.0, epsilon = 1e-12);
        assert_relative_eq!(quantile_linear(&[5.0, 1.0, 3.0], 0.5), 3.0, epsilon = 1e-12);
        assert!(quantile_linear(&[], 0.5).is_nan());
    }
}
