//! # tf-toys
//!
//! Toy Monte Carlo sample-and-fit orchestration.
//!
//! This crate provides:
//! - configuration loading and toy source access ([`ToyFitConfig`], [`ToySource`]),
//! - per-trial dataset sampling with optional acceptance ([`DatasetSampler`]),
//! - the trial loop over models and fit strategies ([`TrialLoop`]),
//! - generator-truth reconciliation with previous runs ([`check_generator_truth`]),
//! - result aggregation with pulls and covariances, persisted to a [`FitStore`].
//!
//! Small built-in models and strategies make the engine usable end to end; the loop itself only
//! depends on the capability traits of `tf-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acceptance;
pub mod aggregate;
pub mod batch;
pub mod binder;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod expr;
pub mod models;
pub mod paths;
pub mod run;
pub mod sampler;
pub mod source;
pub mod store;
pub mod strategies;
pub mod summary;
pub mod truth;

pub use acceptance::ExpressionAcceptance;
pub use aggregate::{AggregateResult, Pull, RESULTS_TABLE, ResultAggregator, compute_pulls};
pub use batch::JobIdentity;
pub use config::ToyFitConfig;
pub use controller::{TrialAccumulator, TrialLoop, TrialRecord};
pub use paths::{OutputTarget, Paths};
pub use run::{Capabilities, RunOptions, RunSummary, run_toy_fits};
pub use sampler::{DatasetSampler, SampledDataset};
pub use source::ToySource;
pub use store::{Cell, FitStore, Frame};
pub use strategies::{BootstrapFit, SimpleFit};
pub use summary::{PullSummary, summarize_store};
pub use truth::{GeneratorTruth, TruthCheck, check_generator_truth};
