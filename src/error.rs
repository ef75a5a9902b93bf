//! Error types for the driver.

use crate::backend::{BackendError, ErrorKind};
use std::time::Duration;
use thiserror::Error;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No session became available within the acquire timeout.
    #[error("Session pool exhausted: no session available within {0:?}")]
    PoolExhausted(Duration),

    /// Session creation kept failing with retryable errors.
    #[error("Backend unavailable after {attempts} attempt(s): {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// The transaction was invalidated by the backend; roll it back.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bound value does not fit the declared parameter type.
    #[error("Type mismatch for {target}: expected {expected}, got {actual}")]
    TypeMismatch {
        target: String,
        expected: String,
        actual: String,
    },

    /// The value has no backend representation.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A backend value cannot be converted to the requested type.
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// A result was subscribed to more than once.
    #[error("Result has already been subscribed to")]
    MultipleSubscription,

    /// A placeholder in the statement text has no bound value.
    #[error("Parameter '{0}' is not bound")]
    UnboundParameter(String),

    /// The name or index does not refer to a placeholder of the statement.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// A backend round-trip did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Backend failure surfaced without retry.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a type mismatch error.
    pub fn mismatch(
        target: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::TypeMismatch {
            target: target.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::ConversionError(message.into())
    }

    /// Whether a caller may reasonably retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted(_) | Self::BackendUnavailable { .. } | Self::Timeout { .. } => true,
            Self::Backend(e) => e.kind() == ErrorKind::Retryable,
            _ => false,
        }
    }

    /// Errors caused by misuse of the API rather than by the backend.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_)
                | Self::MultipleSubscription
                | Self::UnboundParameter(_)
                | Self::UnknownParameter(_)
        )
    }

    /// Map a backend failure seen while running a statement.
    ///
    /// Aborted transactions get their own variant; everything else is
    /// carried verbatim.
    pub(crate) fn from_statement(err: BackendError) -> Self {
        match err.kind() {
            ErrorKind::TransactionAborted => Self::TransactionAborted(err.message().to_string()),
            _ => Self::Backend(err),
        }
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
