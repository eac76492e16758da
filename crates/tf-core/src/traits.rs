//! Core traits for toyfit
//!
//! The trial loop only sees these capabilities: models adapt sampled tables into their own
//! datasets, strategies turn a model plus dataset into a fit outcome, and acceptances thin and
//! reweight rows. Concrete implementations live in `tf-toys` (built-ins) or in test code.

use std::collections::BTreeSet;

use rand::rngs::StdRng;

use crate::Result;
use crate::dataset::ModelDataset;
use crate::table::EventTable;
use crate::types::{FitOptions, FitResult};

/// Statistical model capability.
pub trait FitModel: Send + Sync {
    /// Model kind (e.g. "gaussian").
    fn kind(&self) -> &str;

    /// Columns the model needs after [`FitModel::transform`].
    fn observables(&self) -> Vec<String>;

    /// Adapt a sampled table into the model's native layout.
    fn transform(&self, table: &EventTable) -> Result<EventTable>;

    /// Category variables the model splits its dataset on.
    fn category_variables(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Parameter names reported by [`FitModel::estimate`].
    fn parameter_names(&self, extended: bool) -> Vec<String>;

    /// Point estimate with uncertainties on a bound dataset.
    fn estimate(&self, dataset: &ModelDataset, options: &FitOptions) -> Result<FitResult>;
}

/// Outcome of one strategy invocation.
///
/// Outcomes may own expensive resources; the trial loop snapshots what it needs and drops the
/// outcome before the next invocation.
pub trait FitOutcome: Send {
    /// Parameter names.
    fn parameter_names(&self) -> &[String];

    /// Fitted values, aligned with [`FitOutcome::parameter_names`].
    fn values(&self) -> &[f64];

    /// Symmetric uncertainties, aligned with [`FitOutcome::parameter_names`].
    fn uncertainties(&self) -> &[f64];

    /// Asymmetric `(low, high)` errors, if computed.
    fn asymmetric_errors(&self) -> Option<&[(f64, f64)]> {
        None
    }

    /// Row-major covariance matrix, if available.
    fn covariance(&self) -> Option<&[f64]>;

    /// Fit status code (0 = success).
    fn status(&self) -> i32;

    /// Negative log-likelihood at the estimate.
    fn nll(&self) -> f64;
}

/// Named fitting procedure.
pub trait FitStrategy: Send + Sync {
    /// Strategy name as used in configuration.
    fn name(&self) -> &str;

    /// Fit `dataset` with `model`.
    fn fit(
        &self,
        model: &dyn FitModel,
        dataset: &ModelDataset,
        options: &FitOptions,
    ) -> Result<Box<dyn FitOutcome>>;
}

/// Per-event acceptance (efficiency) capability.
pub trait Acceptance: Send + Sync {
    /// Keep each row with the acceptance probability of its kinematics.
    fn accept_reject(&self, rows: &EventTable, rng: &mut StdRng) -> Result<EventTable>;

    /// Per-row fit weights correcting for the accept-reject thinning.
    ///
    /// Weights are finite and strictly positive.
    fn fit_weights(&self, rows: &EventTable) -> Result<Vec<f64>>;
}
