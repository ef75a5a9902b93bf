//! Connections and the factory that creates them.
//!
//! A connection leases at most one session at a time. Outside an explicit
//! transaction the lease belongs to the running result and is returned when
//! the result terminates; inside a transaction the connection holds it until
//! commit or rollback.

use super::pool::{SessionLease, SessionPool};
use super::result::{QueryResult, SessionScope};
use super::statement::{Batch, Statement};
use super::template::{QueryTemplate, query_hash};
use super::transaction::{IsolationMode, TransactionController, TxStatus};
use crate::backend::{Backend, PartStream, QueryRequest, SessionId, SessionStatus};
use crate::config::ConnectionConfig;
use crate::error::{DriverError, DriverResult};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How thoroughly [`Connection::validate`] checks the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationDepth {
    /// Only local state: the connection is open.
    Local,
    /// Also check the session with a keep-alive round-trip.
    Remote,
}

/// A logical connection to the database.
pub struct Connection {
    pool: SessionPool,
    config: Arc<ConnectionConfig>,
    tx: TransactionController,
    /// Session pinned by an explicit transaction.
    lease: Option<SessionLease>,
    closed: bool,
    templates: Option<LruCache<u64, Arc<QueryTemplate>>>,
    /// Background cancellation of a result dropped mid-stream.
    pending_cleanup: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(pool: SessionPool, config: Arc<ConnectionConfig>) -> Self {
        let templates = NonZeroUsize::new(config.statement_cache_capacity).map(LruCache::new);
        Self {
            tx: TransactionController::new(config.default_isolation),
            pool,
            config,
            lease: None,
            closed: false,
            templates,
            pending_cleanup: None,
        }
    }

    // ==================== Transactions ====================

    /// Begin a transaction with the default isolation.
    pub async fn begin(&mut self) -> DriverResult<()> {
        let isolation = self.tx.default_isolation();
        self.begin_with(isolation).await
    }

    /// Begin a transaction.
    ///
    /// With `lazy_begin` (the default) nothing is sent: the first statement
    /// starts the transaction on the backend.
    pub async fn begin_with(&mut self, isolation: IsolationMode) -> DriverResult<()> {
        self.ensure_open()?;
        self.settle().await;
        self.tx.begin(isolation)?;
        if self.config.lazy_begin {
            return Ok(());
        }

        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                self.tx.abandon();
                return Err(e);
            }
        };
        let backend = self.backend();
        let timeout = self.config.operation_timeout;
        let begun =
            tokio::time::timeout(timeout, backend.begin_transaction(lease.id(), isolation)).await;
        match begun {
            Ok(Ok(tx_id)) => {
                self.tx.on_begun(tx_id);
                self.lease = Some(lease);
                Ok(())
            }
            Ok(Err(e)) => {
                self.tx.abandon();
                if e.is_session_invalid() {
                    lease.invalidate();
                } else {
                    lease.release();
                }
                Err(e.into())
            }
            Err(_) => {
                self.tx.abandon();
                lease.invalidate();
                Err(DriverError::Timeout {
                    operation: "begin",
                    timeout,
                })
            }
        }
    }

    /// Commit the open transaction and release its session.
    ///
    /// After a failed commit the transaction is gone and the connection is
    /// ready for a new one.
    pub async fn commit(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.settle().await;
        let Some(tx_id) = self.tx.begin_commit()? else {
            // Never reached the backend.
            self.tx.complete_commit(true);
            self.release_lease(true);
            return Ok(());
        };
        let Some(session) = self.session_id().cloned() else {
            self.tx.complete_commit(false);
            return Err(DriverError::invalid_state("transaction has no session"));
        };

        let backend = self.backend();
        let timeout = self.config.operation_timeout;
        let committed =
            tokio::time::timeout(timeout, backend.commit_transaction(&session, &tx_id)).await;
        match committed {
            Ok(Ok(())) => {
                self.tx.complete_commit(true);
                self.release_lease(true);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(tx = %tx_id, error = %e, "commit failed");
                self.tx.complete_commit(false);
                self.release_lease(!e.is_session_invalid());
                Err(DriverError::from_statement(e))
            }
            Err(_) => {
                self.tx.complete_commit(false);
                self.release_lease(false);
                Err(DriverError::Timeout {
                    operation: "commit",
                    timeout,
                })
            }
        }
    }

    /// Roll back the open transaction and release its session.
    ///
    /// This is the only way out of an aborted transaction.
    pub async fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.settle().await;
        let tx_id = self.tx.begin_rollback()?;

        let mut healthy = true;
        let mut outcome = Ok(());
        if let Some(tx_id) = tx_id
            && let Some(session) = self.session_id().cloned()
        {
            let backend = self.backend();
            let timeout = self.config.operation_timeout;
            let rolled_back =
                tokio::time::timeout(timeout, backend.rollback_transaction(&session, &tx_id)).await;
            match rolled_back {
                Ok(Ok(())) => {}
                // The session took the transaction with it.
                Ok(Err(e)) if e.is_session_invalid() => {
                    debug!(tx = %tx_id, error = %e, "rollback on a lost session");
                    healthy = false;
                }
                Ok(Err(e)) => outcome = Err(e.into()),
                Err(_) => {
                    healthy = false;
                    outcome = Err(DriverError::Timeout {
                        operation: "rollback",
                        timeout,
                    });
                }
            }
        }

        self.tx.complete_rollback();
        self.release_lease(healthy);
        outcome
    }

    pub fn transaction_status(&self) -> TxStatus {
        self.tx.status()
    }

    /// True when statements run in implicit transactions of their own.
    pub fn is_auto_commit(&self) -> bool {
        !self.tx.in_transaction()
    }

    /// Isolation of the open transaction, or the default when none is open.
    pub fn isolation(&self) -> IsolationMode {
        self.tx.isolation()
    }

    /// Change the isolation used by implicit statements and by `begin()`.
    pub fn set_default_isolation(&mut self, isolation: IsolationMode) -> DriverResult<()> {
        self.ensure_open()?;
        self.tx.set_default_isolation(isolation)
    }

    // ==================== Statements ====================

    /// Prepare a statement. The text is parsed once per connection and
    /// cached.
    pub fn create_statement(&mut self, text: &str) -> DriverResult<Statement<'_>> {
        self.ensure_open()?;
        let template = self.template(text);
        Ok(Statement::new(self, template))
    }

    /// Start a batch of parameterless statements sent as one query.
    pub fn create_batch(&mut self) -> DriverResult<Batch<'_>> {
        self.ensure_open()?;
        Ok(Batch::new(self))
    }

    fn template(&mut self, text: &str) -> Arc<QueryTemplate> {
        let Some(cache) = self.templates.as_mut() else {
            return Arc::new(QueryTemplate::parse(text));
        };
        let key = query_hash(text);
        if let Some(template) = cache.get(&key)
            && template.text() == text
        {
            return template.clone();
        }
        let template = Arc::new(QueryTemplate::parse(text));
        cache.put(key, template.clone());
        template
    }

    /// Number of parsed templates in the statement cache.
    pub fn cached_statements(&self) -> usize {
        self.templates.as_ref().map_or(0, LruCache::len)
    }

    /// Resolve the session and transaction context for one statement.
    ///
    /// The query itself is sent on the first demand.
    pub(crate) async fn start_unit(
        &mut self,
        request: QueryRequest,
    ) -> DriverResult<QueryResult<'_>> {
        self.ensure_open()?;
        self.settle().await;
        let control = self.tx.statement_context()?;
        let (scope, session) = if self.tx.in_transaction() {
            if self.lease.is_none() {
                self.lease = Some(self.pool.acquire().await?);
            }
            let session = self
                .session_id()
                .cloned()
                .ok_or_else(|| DriverError::invalid_state("transaction has no session"))?;
            (SessionScope::Transaction, session)
        } else {
            let lease = self.pool.acquire().await?;
            let id = lease.id().clone();
            (SessionScope::Statement(lease), id)
        };
        debug!(session = %session, ?control, query = %request.text, "statement ready");
        Ok(QueryResult::new(self, scope, session, control, request))
    }

    // ==================== Lifecycle ====================

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the connection. An open transaction is rolled back. Closing
    /// twice is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.settle().await;
        if self.tx.in_transaction()
            && let Err(e) = self.rollback().await
        {
            debug!(error = %e, "rollback on close failed");
        }
        self.release_lease(true);
        self.closed = true;
        debug!("connection closed");
    }

    /// Check that the connection is usable.
    pub async fn validate(&mut self, depth: ValidationDepth) -> bool {
        if self.closed {
            return false;
        }
        if depth == ValidationDepth::Local {
            return true;
        }
        self.settle().await;

        if let Some(session) = self.session_id().cloned() {
            let alive = self.ping(&session).await;
            if !alive {
                self.lose_session("session failed validation");
            }
            return alive;
        }
        match self.pool.acquire().await {
            Ok(lease) => {
                let alive = self.ping(lease.id()).await;
                if alive {
                    lease.release();
                } else {
                    lease.invalidate();
                }
                alive
            }
            Err(e) => {
                debug!(error = %e, "validation could not lease a session");
                false
            }
        }
    }

    async fn ping(&self, session: &SessionId) -> bool {
        let backend = self.backend();
        matches!(
            tokio::time::timeout(self.config.operation_timeout, backend.keep_alive(session)).await,
            Ok(Ok(SessionStatus::Ready))
        )
    }

    // ==================== Internals shared with results ====================

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.pool.backend().clone()
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    pub(crate) fn tx_mut(&mut self) -> &mut TransactionController {
        &mut self.tx
    }

    /// Session pinned by the open transaction.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.lease.as_ref().map(SessionLease::id)
    }

    /// The transaction's session is unusable: destroy it and poison the
    /// transaction.
    pub(crate) fn lose_session(&mut self, reason: &str) {
        if let Some(lease) = self.lease.take() {
            lease.invalidate();
        }
        self.tx.on_session_lost(reason);
    }

    /// Cancel an open remote call after its result was dropped. The lease,
    /// if the result owned one, is returned once the backend acknowledges.
    pub(crate) fn defer_cancel(&mut self, mut parts: Box<dyn PartStream>, lease: Option<SessionLease>) {
        let timeout = self.config.operation_timeout;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            if let Some(lease) = lease {
                lease.invalidate();
            }
            return;
        };
        self.pending_cleanup = Some(handle.spawn(async move {
            let acked = tokio::time::timeout(timeout, parts.cancel()).await.is_ok();
            if let Some(lease) = lease {
                if acked {
                    lease.release();
                } else {
                    lease.invalidate();
                }
            }
        }));
    }

    fn release_lease(&mut self, healthy: bool) {
        match self.lease.take() {
            Some(lease) if healthy => lease.release(),
            Some(lease) => lease.invalidate(),
            None => {}
        }
    }

    /// Wait for background cleanup of an earlier result so the backend sees
    /// operations in issue order.
    async fn settle(&mut self) {
        if let Some(handle) = self.pending_cleanup.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "result cleanup task failed");
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::invalid_state("connection is closed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if self.tx.in_transaction() {
                // The backend discards the transaction with the session.
                warn!(session = %lease.id(), "connection dropped with an open transaction");
                lease.invalidate();
            } else {
                lease.release();
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session_id())
            .field("tx", &self.tx.status())
            .field("closed", &self.closed)
            .finish()
    }
}

// ==================== Factory ====================

/// Static facts about the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryMetadata {
    name: &'static str,
}

impl FactoryMetadata {
    /// Product name of the database.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Creates connections sharing one session pool.
///
/// # Example
/// ```ignore
/// let config = ConnectionConfig::builder()
///     .endpoint("grpcs://ydb.example.com:2135")
///     .database("/ru-central1/b1g/etn")
///     .build()?;
/// let factory = ConnectionFactory::new(config, backend).await?;
/// let mut conn = factory.create()?;
/// ```
#[derive(Clone)]
pub struct ConnectionFactory {
    config: Arc<ConnectionConfig>,
    pool: SessionPool,
}

impl ConnectionFactory {
    /// Validate the configuration, create the pool and warm it up to
    /// `min_idle` sessions.
    pub async fn new(config: ConnectionConfig, backend: Arc<dyn Backend>) -> DriverResult<Self> {
        config.validate()?;
        let pool = SessionPool::new(config.pool.clone(), backend)?;
        pool.warm_up().await?;
        info!(
            endpoint = %config.endpoint,
            database = %config.database,
            isolation = %config.default_isolation,
            "connection factory ready"
        );
        Ok(Self {
            config: Arc::new(config),
            pool,
        })
    }

    pub fn create(&self) -> DriverResult<Connection> {
        if self.pool.is_closed() {
            return Err(DriverError::invalid_state("connection factory is closed"));
        }
        Ok(Connection::new(self.pool.clone(), self.config.clone()))
    }

    pub fn metadata(&self) -> FactoryMetadata {
        FactoryMetadata { name: "YDB" }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Close the pool. Connections already created fail on their next
    /// session acquisition.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("endpoint", &self.config.endpoint)
            .field("database", &self.config.database)
            .field("pool", &self.pool)
            .finish()
    }
}
