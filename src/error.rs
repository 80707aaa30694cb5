//! Error types for the query coordinator.

use crate::types::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The engine accepted a subscription but exposed no delivery stream.
    /// This is an engine contract breach, not a recoverable user error.
    #[error("Engine exposed no delivery stream after subscribe (query {0})")]
    MissingDeliveryStream(String),

    #[error("Query rejected: {0}")]
    Rejected(QueryError),

    #[error("Timed out after {0:?} waiting for a result")]
    Timeout(Duration),

    #[error("Result channel disconnected")]
    Disconnected,
}

impl From<QueryError> for CoordinatorError {
    fn from(e: QueryError) -> Self {
        CoordinatorError::Rejected(e)
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
