//! # tf-core
//!
//! Core types and traits for toyfit.
//!
//! This crate defines:
//! - the error taxonomy and process exit statuses,
//! - the columnar [`EventTable`] and the model-native [`ModelDataset`],
//! - the capability traits ([`FitModel`], [`FitStrategy`], [`FitOutcome`], [`Acceptance`])
//!   the trial loop is written against.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod error;
pub mod table;
pub mod traits;
pub mod types;

pub use dataset::ModelDataset;
pub use error::{Error, ExitStatus, Result};
pub use table::{CATEGORY_COLUMN, Column, EventTable, WEIGHT_COLUMN};
pub use traits::{Acceptance, FitModel, FitOutcome, FitStrategy};
pub use types::{CovarianceMatrix, FitOptions, FitResult, ParameterEstimate, snapshot_outcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
