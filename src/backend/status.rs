//! Backend status codes and failure classification.
//!
//! The session API reports failures as a status code plus issue text.
//! The driver only cares about four classes of failure; `ErrorKind` is
//! derived from the status code and drives retry, invalidation and
//! transaction-abort decisions.

use std::fmt;

/// Status vocabulary of the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Too many requests; back off and retry.
    Overloaded,
    /// The cluster (or a part of it) is temporarily unreachable.
    Unavailable,
    /// The session is still executing a previous request.
    SessionBusy,
    /// The session is unknown to the server.
    BadSession,
    /// The session was closed by the server.
    SessionExpired,
    /// The transaction was aborted (optimistic lock conflict).
    Aborted,
    /// The transaction or object does not exist.
    NotFound,
    /// Constraint violation such as a duplicate primary key.
    PreconditionFailed,
    /// Malformed request or query.
    BadRequest,
    /// Referenced table or column does not exist.
    SchemeError,
    /// Credentials were rejected.
    Unauthorized,
    /// The server gave up on the request.
    Timeout,
    /// The request was cancelled.
    Cancelled,
    InternalError,
    GenericError,
}

impl StatusCode {
    /// Classify the status code.
    pub fn kind(self) -> ErrorKind {
        match self {
            StatusCode::Overloaded | StatusCode::Unavailable | StatusCode::SessionBusy => {
                ErrorKind::Retryable
            }
            StatusCode::BadSession | StatusCode::SessionExpired => ErrorKind::SessionInvalid,
            StatusCode::Aborted => ErrorKind::TransactionAborted,
            StatusCode::NotFound
            | StatusCode::PreconditionFailed
            | StatusCode::BadRequest
            | StatusCode::SchemeError
            | StatusCode::Unauthorized
            | StatusCode::Timeout
            | StatusCode::Cancelled
            | StatusCode::InternalError
            | StatusCode::GenericError => ErrorKind::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Overloaded => "OVERLOADED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::SessionBusy => "SESSION_BUSY",
            StatusCode::BadSession => "BAD_SESSION",
            StatusCode::SessionExpired => "SESSION_EXPIRED",
            StatusCode::Aborted => "ABORTED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            StatusCode::BadRequest => "BAD_REQUEST",
            StatusCode::SchemeError => "SCHEME_ERROR",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::GenericError => "GENERIC_ERROR",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes the driver reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient; safe to retry where the operation is idempotent.
    Retryable,
    /// The session can no longer be used and must be discarded.
    SessionInvalid,
    /// The enclosing transaction is dead.
    TransactionAborted,
    /// Anything else.
    Fatal,
}

/// An error reported by the backend session API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    status: StatusCode,
    message: String,
}

impl BackendError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.status.kind()
    }

    /// Overload and availability errors during session creation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub fn is_session_invalid(&self) -> bool {
        self.kind() == ErrorKind::SessionInvalid
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for BackendError {}
