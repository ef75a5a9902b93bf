//! The storage engine's session API, as seen by the driver.
//!
//! Transport, authentication and protocol framing live behind [`Backend`].
//! Results arrive as a sequence of parts pulled one at a time through
//! [`PartStream`]; the driver decides when to pull.

#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod status;

pub use status::{BackendError, ErrorKind, StatusCode};

use crate::driver::IsolationMode;
use crate::types::{NativeType, NativeValue};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Server-side session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(Arc<str>);

impl TxId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which transaction a query runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxControl {
    /// A transaction of its own, committed when the query completes.
    Implicit(IsolationMode),
    /// Start a new transaction and leave it open; the response carries its id.
    Begin(IsolationMode),
    /// Run inside an already started transaction.
    Continue(TxId),
}

/// One query submission.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub text: String,
    /// Parameters by name, including the `$` prefix.
    pub params: Vec<(String, NativeValue)>,
    /// Rows per part the caller would like; the backend may ignore it.
    pub fetch_size: Option<usize>,
    /// Keep the compiled query in the server-side cache.
    pub keep_in_cache: bool,
}

/// Column description of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: NativeType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: NativeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A batch of rows delivered by the backend in one notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultPart {
    pub rows: Vec<Vec<NativeValue>>,
    /// No more parts follow.
    pub is_last: bool,
}

/// Reply to an accepted query. Rows follow through `parts`.
pub struct QueryResponse {
    /// Set when the query started or continued a transaction.
    pub tx_id: Option<TxId>,
    pub columns: Vec<Column>,
    pub parts: Box<dyn PartStream>,
}

impl fmt::Debug for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResponse")
            .field("tx_id", &self.tx_id)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Health reported by a keep-alive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Busy,
}

/// Pull side of one query's result delivery.
#[async_trait]
pub trait PartStream: Send {
    /// Wait for the next part. `None` once the stream has ended.
    ///
    /// Must be cancel-safe: if the future is dropped before it resolves, no
    /// part is lost and the next call picks up where it left off.
    async fn next_part(&mut self) -> Option<Result<ResultPart, BackendError>>;

    /// Abort the remote call. Resolves once the backend acknowledged.
    async fn cancel(&mut self);
}

/// Asynchronous session API of the storage engine.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn create_session(&self) -> Result<SessionId, BackendError>;

    async fn delete_session(&self, session: &SessionId) -> Result<(), BackendError>;

    async fn keep_alive(&self, session: &SessionId) -> Result<SessionStatus, BackendError>;

    /// Local liveness check, consulted when a session is released. True
    /// once the transport knows the session is gone, e.g. the server sent a
    /// session-close hint. Must not block.
    fn is_session_closed(&self, _session: &SessionId) -> bool {
        false
    }

    async fn begin_transaction(
        &self,
        session: &SessionId,
        isolation: IsolationMode,
    ) -> Result<TxId, BackendError>;

    async fn commit_transaction(&self, session: &SessionId, tx: &TxId)
    -> Result<(), BackendError>;

    async fn rollback_transaction(
        &self,
        session: &SessionId,
        tx: &TxId,
    ) -> Result<(), BackendError>;

    async fn execute_query(
        &self,
        session: &SessionId,
        tx: &TxControl,
        request: &QueryRequest,
    ) -> Result<QueryResponse, BackendError>;
}
