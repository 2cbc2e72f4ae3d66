//! Error types for reactive aggregations.

use crate::types::BoxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for reactive aggregation operations.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Aggregation failed: {0}")]
    Aggregation(#[source] BoxError),

    #[error("Unexpected aggregation result: {0}")]
    UnexpectedShape(String),

    #[error("Result record at position {position} has no `{field}` field")]
    MissingIdentity { field: String, position: usize },

    #[error("Observer error: {0}")]
    Observer(String),

    #[error("Subscription stopped")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggregateError {
    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregateError::Configuration(_) => ErrorKind::Configuration,
            AggregateError::Aggregation(_)
            | AggregateError::UnexpectedShape(_)
            | AggregateError::MissingIdentity { .. } => ErrorKind::Aggregation,
            AggregateError::Observer(_) => ErrorKind::Observer,
            AggregateError::Stopped => ErrorKind::Stopped,
            AggregateError::Io(_) => ErrorKind::Io,
        }
    }

    /// Wrap a failure reported by an aggregation engine.
    pub fn aggregation(err: impl Into<BoxError>) -> Self {
        AggregateError::Aggregation(err.into())
    }
}

impl From<serde_json::Error> for AggregateError {
    fn from(e: serde_json::Error) -> Self {
        AggregateError::Configuration(e.to_string())
    }
}

/// Kind tag carried by every [`AggregateError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Aggregation,
    Observer,
    Stopped,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Aggregation => "aggregation",
            ErrorKind::Observer => "observer",
            ErrorKind::Stopped => "stopped",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for reactive aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
