//! Error types for toyfit

use thiserror::Error;

/// toyfit error type
///
/// Variants follow the failure taxonomy of a toy study run; [`ExitStatus`]
/// maps each of them to the status code reported by the command line.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or malformed configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Human readable description.
        message: String,
        /// Key paths (`fit/nfits`, `data/<id>/nevents`, ...) that are missing.
        missing_keys: Vec<String>,
    },

    /// Input file or toy source absent or unusable.
    #[error("Input error: {0}")]
    Input(String),

    /// A model or strategy could not be configured.
    #[error("Model configuration error: {0}")]
    ModelConfig(String),

    /// Generator-truth values disagree with a previously written output.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A fit strategy failed inside the trial loop.
    #[error("Fit execution error: {0}")]
    FitExecution(String),

    /// Output store could not be written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Configuration error without missing key paths.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into(), missing_keys: Vec::new() }
    }

    /// Configuration error reporting the given missing key paths.
    pub fn missing_keys(keys: Vec<String>) -> Self {
        Error::Config { message: format!("missing keys -> {}", keys.join(", ")), missing_keys: keys }
    }

    /// Status code this error should terminate the process with.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Error::Config { .. } => ExitStatus::ConfigError,
            Error::Io(_) | Error::Json(_) | Error::Input(_) => ExitStatus::MissingFiles,
            Error::ModelConfig(_) => ExitStatus::ModelConfigError,
            Error::FitExecution(_) | Error::Storage(_) => ExitStatus::FitLoopError,
            Error::Consistency(_) => ExitStatus::InconsistentInput,
            Error::Validation(_) | Error::Computation(_) => ExitStatus::Uncaught,
        }
    }
}

/// Process exit statuses of the toy fitting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// All good.
    Success = 0,
    /// Error in the configuration files.
    ConfigError = 1,
    /// Configuration or toy files missing.
    MissingFiles = 2,
    /// Error configuring models or fit strategies.
    ModelConfigError = 3,
    /// Error during the sample-fit loop.
    FitLoopError = 4,
    /// Input data inconsistent with previous fits.
    InconsistentInput = 5,
    /// Uncaught error.
    Uncaught = 128,
}

impl ExitStatus {
    /// Numeric status code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
