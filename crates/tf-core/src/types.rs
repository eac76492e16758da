//! Common data types for toyfit

use serde::{Deserialize, Serialize};

use crate::traits::FitOutcome;

/// Options forwarded to every fit strategy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    /// Extended fit (yields are free parameters).
    pub extended: bool,
    /// Compute asymmetric (MINOS-like) errors where the strategy supports it.
    pub minos: bool,
    /// Verbose strategy output.
    pub verbose: bool,
    /// Seed for strategy-internal randomness; drawn from the run's RNG stream.
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { extended: true, minos: true, verbose: false, seed: 0 }
    }
}

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter names, in the order of `parameters`.
    pub names: Vec<String>,

    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Asymmetric `(low, high)` errors; `low` is negative. `None` if not computed.
    pub asymmetric: Option<Vec<(f64, f64)>>,

    /// Covariance matrix (row-major, N×N). `None` if unavailable.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at the estimate
    pub nll: f64,

    /// Fit status (0 = success)
    pub status: i32,
}

impl FitResult {
    /// Create a new fit result
    pub fn new(names: Vec<String>, parameters: Vec<f64>, uncertainties: Vec<f64>, nll: f64, status: i32) -> Self {
        Self { names, parameters, uncertainties, asymmetric: None, covariance: None, nll, status }
    }

    /// Failed fit: NaN estimates for every parameter.
    pub fn failed(names: Vec<String>, status: i32) -> Self {
        let n = names.len();
        Self::new(names, vec![f64::NAN; n], vec![f64::NAN; n], f64::NAN, status)
    }

    /// Attach a covariance matrix (row-major, N×N).
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Diagonal covariance built from the uncertainties.
    pub fn with_diagonal_covariance(self) -> Self {
        let n = self.uncertainties.len();
        let mut cov = vec![0.0; n * n];
        for (i, s) in self.uncertainties.iter().enumerate() {
            cov[i * n + i] = s * s;
        }
        self.with_covariance(cov)
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl FitOutcome for FitResult {
    fn parameter_names(&self) -> &[String] {
        &self.names
    }

    fn values(&self) -> &[f64] {
        &self.parameters
    }

    fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }

    fn asymmetric_errors(&self) -> Option<&[(f64, f64)]> {
        self.asymmetric.as_deref()
    }

    fn covariance(&self) -> Option<&[f64]> {
        self.covariance.as_deref()
    }

    fn status(&self) -> i32 {
        self.status
    }

    fn nll(&self) -> f64 {
        self.nll
    }
}

/// Plain record of one parameter estimate, detached from the fit outcome object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    /// Parameter name
    pub name: String,
    /// Fitted value
    pub value: f64,
    /// Symmetric uncertainty
    pub error: f64,
    /// Asymmetric `(low, high)` errors, if computed
    pub asymmetric: Option<(f64, f64)>,
}

/// Named, square covariance matrix (row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    /// Parameter names labelling rows and columns
    pub names: Vec<String>,
    /// Row-major values, `names.len()²` entries
    pub values: Vec<f64>,
}

impl CovarianceMatrix {
    /// Element `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.names.len() + j]
    }
}

/// Detach the plain parameter estimates and covariance from a fit outcome.
pub fn snapshot_outcome(outcome: &dyn FitOutcome) -> (Vec<ParameterEstimate>, Option<CovarianceMatrix>) {
    let names = outcome.parameter_names();
    let values = outcome.values();
    let errors = outcome.uncertainties();
    let asym = outcome.asymmetric_errors();
    let params = names
        .iter()
        .enumerate()
        .map(|(i, name)| ParameterEstimate {
            name: name.clone(),
            value: values.get(i).copied().unwrap_or(f64::NAN),
            error: errors.get(i).copied().unwrap_or(f64::NAN),
            asymmetric: asym.and_then(|a| a.get(i).copied()),
        })
        .collect();
    let cov = outcome.covariance().and_then(|values| {
        (values.len() == names.len() * names.len())
            .then(|| CovarianceMatrix { names: names.to_vec(), values: values.to_vec() })
    });
    (params, cov)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_result() {
        let result = FitResult::new(
            vec!["mu".into(), "sigma".into()],
            vec![1.0, 2.0],
            vec![0.1, 0.2],
            123.45,
            0,
        )
        .with_diagonal_covariance();
        assert_eq!(result.parameters.len(), 2);
        assert_eq!(result.index_of("sigma"), Some(1));
        let cov = result.covariance.as_ref().unwrap();
        approx::assert_relative_eq!(cov[3], 0.04, epsilon = 1e-12);
        assert_eq!(cov[1], 0.0);
    }

    #[test]
    fn test_snapshot_outcome() {
        let mut result = FitResult::new(vec!["x".into()], vec![5.2], vec![0.4], 1.0, 0)
            .with_diagonal_covariance();
        result.asymmetric = Some(vec![(-0.3, 0.5)]);
        let (params, cov) = snapshot_outcome(&result);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "x");
        assert_eq!(params[0].asymmetric, Some((-0.3, 0.5)));
        let cov = cov.unwrap();
        approx::assert_relative_eq!(cov.get(0, 0), 0.16, epsilon = 1e-12);
    }

    #[test]
    fn test_snapshot_drops_malformed_covariance() {
        let result = FitResult::new(vec!["a".into(), "b".into()], vec![1.0, 2.0], vec![0.1, 0.1], 0.0, 0)
            .with_covariance(vec![1.0]);
        let (_, cov) = snapshot_outcome(&result);
        assert!(cov.is_none());
    }

    #[test]
    fn test_failed_result() {
        let r = FitResult::failed(vec!["tau".into()], 1);
        assert!(r.parameters[0].is_nan());
        assert_eq!(r.status, 1);
    }
}
