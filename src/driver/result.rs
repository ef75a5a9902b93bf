//! Results and demand-driven row streams.
//!
//! [`QueryResult`] is what `execute` returns: the session is resolved but
//! nothing has been sent. [`QueryResult::subscribe`] hands out the single
//! [`RowStream`], which sends the query on the first positive demand and
//! fetches parts through the [`Bridge`] as demand allows.
//!
//! ```ignore
//! let mut result = stmt.execute().await?;
//! let mut rows = result.subscribe()?;
//! rows.request(10);
//! while let Some(row) = rows.next().await {
//!     let row = row?;
//!     println!("{}", row.get::<String>("name")?);
//! }
//! ```

use super::bridge::{Bridge, Cancel, Outcome, Step, UNBOUNDED};
use super::connection::Connection;
use super::pool::SessionLease;
use super::row::{FromRow, Row, RowMetadata};
use crate::backend::{BackendError, PartStream, QueryRequest, SessionId, TxControl};
use crate::error::{DriverError, DriverResult};
use crate::types::NativeValue;
use futures::Stream;
use std::sync::Arc;
use tracing::{debug, warn};

/// Who owns the session a result runs on.
#[derive(Debug)]
pub(crate) enum SessionScope {
    /// Implicit transaction: the result holds the lease and returns it when
    /// it terminates.
    Statement(SessionLease),
    /// Explicit transaction: the connection holds the lease.
    Transaction,
}

#[derive(Debug)]
struct Pending {
    scope: SessionScope,
    session: SessionId,
    control: TxControl,
    request: QueryRequest,
}

/// An executed statement whose rows have not been requested yet.
///
/// Dropping it without subscribing releases the session; no query reaches
/// the backend.
pub struct QueryResult<'c> {
    conn: &'c mut Connection,
    pending: Option<Pending>,
}

impl<'c> QueryResult<'c> {
    pub(crate) fn new(
        conn: &'c mut Connection,
        scope: SessionScope,
        session: SessionId,
        control: TxControl,
        request: QueryRequest,
    ) -> Self {
        Self {
            conn,
            pending: Some(Pending {
                scope,
                session,
                control,
                request,
            }),
        }
    }

    /// Take the row stream. A result has exactly one subscriber.
    pub fn subscribe(&mut self) -> DriverResult<RowStream<'_>> {
        let pending = self.pending.take().ok_or(DriverError::MultipleSubscription)?;
        Ok(RowStream::new(&mut *self.conn, pending))
    }

    /// Subscribe and read every row.
    pub async fn rows(mut self) -> DriverResult<Vec<Row>> {
        let mut stream = self.subscribe()?;
        stream.collect().await
    }

    /// Subscribe and read every row as `T`.
    pub async fn rows_as<T: FromRow>(mut self) -> DriverResult<Vec<T>> {
        let mut stream = self.subscribe()?;
        stream.collect_as().await
    }

    /// Text of the statement as it will be sent.
    pub fn text(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.request.text.as_str())
    }
}

impl std::fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("subscribed", &self.pending.is_none())
            .finish()
    }
}

/// How a backend call went wrong.
enum Failure {
    Backend(BackendError),
    Timeout(&'static str),
    /// An earlier send was dropped before the backend answered.
    Interrupted,
}

/// Demand-gated rows of one result.
///
/// Rows are emitted only against outstanding demand. `next` returns `None`
/// both when the result is finished and when demand ran out; use
/// [`RowStream::is_terminated`] to tell them apart.
pub struct RowStream<'r> {
    conn: &'r mut Connection,
    /// `None` once the session has been handed back.
    scope: Option<SessionScope>,
    session: SessionId,
    control: TxControl,
    request: QueryRequest,
    bridge: Bridge<Vec<NativeValue>>,
    parts: Option<Box<dyn PartStream>>,
    /// Set while the query is on its way; still set if that was abandoned.
    sending: bool,
    metadata: Option<Arc<RowMetadata>>,
}

impl<'r> RowStream<'r> {
    fn new(conn: &'r mut Connection, pending: Pending) -> Self {
        Self {
            conn,
            scope: Some(pending.scope),
            session: pending.session,
            control: pending.control,
            request: pending.request,
            bridge: Bridge::new(),
            parts: None,
            sending: false,
            metadata: None,
        }
    }

    /// Allow `n` more rows. Saturates; `u64::MAX` means unbounded.
    pub fn request(&mut self, n: u64) {
        self.bridge.request(n);
    }

    /// Next row within the outstanding demand.
    pub async fn next(&mut self) -> Option<DriverResult<Row>> {
        loop {
            match self.bridge.step() {
                Step::Emit(values) => {
                    let metadata = self.metadata.clone().unwrap_or_default();
                    return Some(Ok(Row::new(values, metadata)));
                }
                Step::Fetch => {
                    if let Err(e) = self.fetch().await {
                        return Some(Err(e));
                    }
                }
                Step::Complete => {
                    debug!(session = %self.session, rows = self.bridge.emitted(), "result complete");
                    self.finish(true);
                    return None;
                }
                Step::Stall | Step::Terminated(_) => return None,
            }
        }
    }

    /// Stop consuming. Idempotent; the session is returned exactly once.
    pub async fn cancel(&mut self) {
        let effect = self.bridge.cancel();
        if effect == Cancel::AlreadyDone {
            return;
        }
        debug!(session = %self.session, ?effect, "result cancelled");
        let mut acked = !self.sending;
        if effect == Cancel::Open
            && let Some(mut parts) = self.parts.take()
        {
            let timeout = self.conn.operation_timeout();
            acked = tokio::time::timeout(timeout, parts.cancel()).await.is_ok();
        }
        self.finish(acked);
    }

    /// Column metadata, known once the query has been sent.
    pub fn metadata(&self) -> Option<&Arc<RowMetadata>> {
        self.metadata.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.bridge.outcome().is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.bridge.outcome()
    }

    /// Outstanding demand.
    pub fn demand(&self) -> u64 {
        self.bridge.demand()
    }

    /// Rows delivered so far.
    pub fn rows_emitted(&self) -> u64 {
        self.bridge.emitted()
    }

    /// Request everything and collect the rows.
    pub async fn collect(&mut self) -> DriverResult<Vec<Row>> {
        self.request(UNBOUNDED);
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    pub async fn collect_as<T: FromRow>(&mut self) -> DriverResult<Vec<T>> {
        self.request(UNBOUNDED);
        let mut out = Vec::new();
        while let Some(row) = self.next().await {
            out.push(T::from_row(&row?)?);
        }
        Ok(out)
    }

    /// Adapt to a [`Stream`] that requests `prefetch` rows whenever demand
    /// runs out.
    pub fn into_stream(self, prefetch: u64) -> impl Stream<Item = DriverResult<Row>> + 'r {
        let prefetch = prefetch.max(1);
        futures::stream::unfold(self, move |mut rows| async move {
            loop {
                if rows.is_terminated() {
                    return None;
                }
                if rows.demand() == 0 {
                    rows.request(prefetch);
                }
                if let Some(item) = rows.next().await {
                    return Some((item, rows));
                }
            }
        })
    }

    // ==================== Backend calls ====================

    async fn fetch(&mut self) -> DriverResult<()> {
        if self.parts.is_none() {
            // Resending could apply the statement twice.
            if self.sending {
                return Err(self.fail(Failure::Interrupted));
            }
            if let Err(failure) = self.send().await {
                return Err(self.fail(failure));
            }
        }

        let timeout = self.conn.operation_timeout();
        let fetched = match self.parts.as_mut() {
            Some(parts) => tokio::time::timeout(timeout, parts.next_part()).await,
            None => Ok(None),
        };
        match fetched {
            Ok(Some(Ok(part))) => {
                self.bridge.on_part(part.rows, part.is_last);
                Ok(())
            }
            Ok(None) => {
                self.bridge.on_end();
                Ok(())
            }
            Ok(Some(Err(e))) => Err(self.fail(Failure::Backend(e))),
            Err(_) => Err(self.fail(Failure::Timeout("fetch"))),
        }
    }

    async fn send(&mut self) -> Result<(), Failure> {
        let backend = self.conn.backend();
        let timeout = self.conn.operation_timeout();
        self.sending = true;
        let sent = tokio::time::timeout(
            timeout,
            backend.execute_query(&self.session, &self.control, &self.request),
        )
        .await;
        self.sending = false;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Failure::Backend(e)),
            Err(_) => return Err(Failure::Timeout("query")),
        };
        self.conn.tx_mut().on_statement_started(response.tx_id.as_ref());
        self.metadata = Some(Arc::new(RowMetadata::from_columns(&response.columns)));
        self.parts = Some(response.parts);
        Ok(())
    }

    /// Terminate with an error: discard buffered rows, update the
    /// transaction and hand the session back.
    fn fail(&mut self, failure: Failure) -> DriverError {
        self.bridge.on_error();
        self.parts = None;
        let timeout = self.conn.operation_timeout();
        let (error, healthy) = match failure {
            Failure::Backend(e) => {
                self.conn.tx_mut().on_backend_error(&e);
                let healthy = !e.is_session_invalid();
                (DriverError::from_statement(e), healthy)
            }
            Failure::Timeout(operation) => (DriverError::Timeout { operation, timeout }, false),
            Failure::Interrupted => (
                DriverError::invalid_state("query send was interrupted, its outcome is unknown"),
                false,
            ),
        };
        warn!(session = %self.session, error = %error, "result failed");
        self.finish(healthy);
        error
    }

    /// Hand the session back. Runs at most once per result.
    fn finish(&mut self, healthy: bool) {
        self.parts = None;
        match self.scope.take() {
            Some(SessionScope::Statement(lease)) if healthy => lease.release(),
            Some(SessionScope::Statement(lease)) => lease.invalidate(),
            Some(SessionScope::Transaction) if !healthy => {
                self.conn.lose_session("session lost while reading a result");
            }
            Some(SessionScope::Transaction) | None => {}
        }
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        match self.bridge.cancel() {
            Cancel::AlreadyDone => {}
            Cancel::Open => {
                debug!(session = %self.session, "result dropped mid-stream");
                // Interrupted while sending: the session state is unknown.
                let Some(parts) = self.parts.take() else {
                    self.finish(false);
                    return;
                };
                let lease = match self.scope.take() {
                    Some(SessionScope::Statement(lease)) => Some(lease),
                    _ => None,
                };
                self.conn.defer_cancel(parts, lease);
            }
            Cancel::NotStarted | Cancel::Drained => self.finish(true),
        }
    }
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("session", &self.session)
            .field("demand", &self.bridge.demand())
            .field("buffered", &self.bridge.buffered())
            .field("outcome", &self.bridge.outcome())
            .finish()
    }
}
