//! Error types for sweeps, measures and models.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::oracle::OracleError;

/// Errors raised while declaring or running a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Wrong type, shape or range for a declared input. Raised before any
    /// computation and never retried.
    #[error("invalid argument `{argument}`: {reason}")]
    InvalidArgument { argument: String, reason: String },

    /// An enumeration step produced nothing to concatenate.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// The external numerical engine failed or misbehaved.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Partial-result persistence failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Sweep configuration could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SweepError {
    /// Create an invalid argument error.
    pub fn invalid(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Create an empty result error.
    pub fn empty(message: impl Into<String>) -> Self {
        Self::EmptyResult(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Get a short error code for logging and failure rows.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::EmptyResult(_) => "empty_result",
            Self::Oracle(_) => "oracle",
            Self::Checkpoint(_) => "checkpoint",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}
