//! Session pool.
//!
//! Sessions are expensive to create on the server, so they are reused across
//! units of work. The semaphore bounds concurrent leases; the idle list is
//! guarded by a short-lived mutex that is never held across an await.

use crate::backend::{Backend, BackendError, SessionId, SessionStatus, StatusCode};
use crate::config::PoolConfig;
use crate::error::{DriverError, DriverResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub leased: usize,
    /// Sessions created on the backend.
    pub created: u64,
    /// Sessions discarded (invalid, expired or pool closed).
    pub destroyed: u64,
    pub acquired: u64,
    /// Leases returned healthy.
    pub released: u64,
    /// Leases returned as unusable.
    pub invalidated: u64,
    /// Acquires that gave up waiting.
    pub timeouts: u64,
    /// Session creation retries after transient failures.
    pub retries: u64,
}

#[derive(Debug)]
struct IdleSession {
    id: SessionId,
    created_at: Instant,
    last_used: Instant,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    invalidated: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
}

struct PoolInner {
    config: PoolConfig,
    backend: Arc<dyn Backend>,
    idle: Mutex<VecDeque<IdleSession>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    leased: AtomicUsize,
    counters: Counters,
}

impl PoolInner {
    fn is_expired(&self, created_at: Instant, last_used: Instant, now: Instant) -> bool {
        if now.duration_since(last_used) > self.config.idle_timeout {
            return true;
        }
        matches!(self.config.max_lifetime, Some(max) if now.duration_since(created_at) > max)
    }

    /// Most recently used healthy idle session. Expired ones are destroyed.
    fn pop_idle(&self) -> Option<IdleSession> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let found = {
            let mut idle = self.idle.lock();
            loop {
                match idle.pop_back() {
                    Some(s) if self.is_expired(s.created_at, s.last_used, now) => expired.push(s),
                    other => break other,
                }
            }
        };
        for s in expired {
            debug!(session = %s.id, "discarding expired idle session");
            self.destroy(s.id);
        }
        found
    }

    /// Sweep expired sessions out of the idle list.
    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<IdleSession> = {
            let mut idle = self.idle.lock();
            let (keep, expired): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|s| !self.is_expired(s.created_at, s.last_used, now));
            *idle = keep.into();
            expired
        };
        let count = expired.len();
        for s in expired {
            self.destroy(s.id);
        }
        count
    }

    async fn ping(&self, id: &SessionId) -> bool {
        let pinged = tokio::time::timeout(self.config.call_timeout, self.backend.keep_alive(id)).await;
        match pinged {
            Ok(Ok(SessionStatus::Ready)) => true,
            Ok(Ok(status)) => {
                debug!(session = %id, ?status, "idle session failed keep-alive");
                false
            }
            Ok(Err(e)) => {
                debug!(session = %id, error = %e, "idle session failed keep-alive");
                false
            }
            Err(_) => {
                debug!(session = %id, "idle session keep-alive timed out");
                false
            }
        }
    }

    async fn create_session(&self) -> Result<SessionId, BackendError> {
        let created = tokio::time::timeout(self.config.call_timeout, self.backend.create_session()).await;
        created.unwrap_or_else(|_| {
            Err(BackendError::new(
                StatusCode::Unavailable,
                "session creation timed out",
            ))
        })
    }

    async fn create_with_retry(&self) -> DriverResult<SessionId> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.create_session().await {
                Ok(id) => {
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    debug!(session = %id, attempt, "session created");
                    return Ok(id);
                }
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        ?delay,
                        error = %e,
                        "session creation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempts = attempt, error = %e, "session creation retries exhausted");
                    return Err(DriverError::BackendUnavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => return Err(DriverError::Backend(e)),
            }
        }
    }

    /// Delete a session on the backend in the background.
    fn destroy(&self, id: SessionId) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(session = %id, "no runtime, session left for server-side expiry");
            return;
        };
        let backend = self.backend.clone();
        let timeout = self.config.call_timeout;
        handle.spawn(async move {
            delete_session(backend.as_ref(), &id, timeout).await;
        });
    }

    fn give_back(&self, session: &LeasedSession, healthy: bool) {
        self.leased.fetch_sub(1, Ordering::Relaxed);
        let id = session.id.clone();
        // A session the server already closed never goes back to idle.
        let healthy = healthy && !self.backend.is_session_closed(&id);
        if !healthy {
            self.counters.invalidated.fetch_add(1, Ordering::Relaxed);
            debug!(session = %id, "session invalidated");
            self.destroy(id);
            return;
        }
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        if self.closed.load(Ordering::Relaxed) {
            self.destroy(id);
            return;
        }
        if matches!(self.config.max_lifetime, Some(max) if now.duration_since(session.created_at) > max)
        {
            debug!(session = %id, "session exceeded max lifetime");
            self.destroy(id);
            return;
        }
        debug!(session = %id, "session released");
        self.idle.lock().push_back(IdleSession {
            id,
            created_at: session.created_at,
            last_used: now,
        });
    }
}

#[derive(Debug)]
struct LeasedSession {
    id: SessionId,
    created_at: Instant,
}

/// An idle session taken off the list but not handed out yet. Dropped
/// without [`IdleGuard::take`], the session is destroyed.
struct IdleGuard<'a> {
    pool: &'a PoolInner,
    session: Option<IdleSession>,
}

impl IdleGuard<'_> {
    fn take(mut self) -> Option<LeasedSession> {
        self.session.take().map(|s| LeasedSession {
            id: s.id,
            created_at: s.created_at,
        })
    }
}

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        if let Some(s) = self.session.take() {
            debug!(session = %s.id, "discarding idle session");
            self.pool.destroy(s.id);
        }
    }
}

async fn delete_session(backend: &dyn Backend, id: &SessionId, timeout: Duration) {
    match tokio::time::timeout(timeout, backend.delete_session(id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = %id, error = %e, "session delete failed"),
        Err(_) => debug!(session = %id, "session delete timed out"),
    }
}

/// Exclusive use of one session until released.
///
/// Dropping a lease releases it.
pub struct SessionLease {
    session: LeasedSession,
    returned: bool,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl SessionLease {
    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    /// Return the session to the pool.
    pub fn release(mut self) {
        self.finish(true);
    }

    /// Destroy the session instead of returning it.
    pub fn invalidate(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, healthy: bool) {
        if !std::mem::replace(&mut self.returned, true) {
            self.pool.give_back(&self.session, healthy);
        }
        // Free the slot only after the session is back in the idle list.
        self.permit.take();
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.finish(true);
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session.id)
            .field("returned", &self.returned)
            .finish()
    }
}

/// # Example
/// ```ignore
/// let pool = SessionPool::new(PoolConfig::new().max_size(20), backend)?;
/// pool.warm_up().await?;
/// let lease = pool.acquire().await?;
/// backend.keep_alive(lease.id()).await?;
/// lease.release();
/// ```
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Create an empty pool. Starts the idle reaper when called inside a
    /// tokio runtime.
    pub fn new(config: PoolConfig, backend: Arc<dyn Backend>) -> DriverResult<Self> {
        config.validate()?;
        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_size)),
            closed: AtomicBool::new(false),
            leased: AtomicUsize::new(0),
            counters: Counters::default(),
            backend,
            config,
        });
        if let Some(every) = inner.config.reaper_interval {
            spawn_reaper(&inner, every);
        }
        info!(max_size = inner.config.max_size, "session pool created");
        Ok(Self { inner })
    }

    /// Create sessions until `min_idle` are idle.
    pub async fn warm_up(&self) -> DriverResult<usize> {
        let missing = self
            .inner
            .config
            .min_idle
            .saturating_sub(self.inner.idle.lock().len());
        for _ in 0..missing {
            let id = self.inner.create_with_retry().await?;
            let now = Instant::now();
            self.inner.idle.lock().push_back(IdleSession {
                id,
                created_at: now,
                last_used: now,
            });
        }
        if missing > 0 {
            info!(sessions = missing, "session pool warmed up");
        }
        Ok(missing)
    }

    /// Lease a session. Waiting for a slot and creating a session together
    /// take at most `acquire_timeout`.
    pub async fn acquire(&self) -> DriverResult<SessionLease> {
        if self.is_closed() {
            return Err(DriverError::invalid_state("session pool is closed"));
        }

        let wait = self.inner.config.acquire_timeout;
        match tokio::time::timeout(wait, self.lease()).await {
            Ok(leased) => leased,
            Err(_) => {
                self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(?wait, "session acquire timed out");
                Err(DriverError::PoolExhausted(wait))
            }
        }
    }

    async fn lease(&self) -> DriverResult<SessionLease> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DriverError::invalid_state("session pool is closed"))?;

        let session = match self.reuse_idle().await {
            Some(s) => s,
            None => LeasedSession {
                id: self.inner.create_with_retry().await?,
                created_at: Instant::now(),
            },
        };

        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        self.inner.counters.acquired.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session.id, "session acquired");
        Ok(SessionLease {
            session,
            returned: false,
            permit: Some(permit),
            pool: self.inner.clone(),
        })
    }

    async fn reuse_idle(&self) -> Option<LeasedSession> {
        while let Some(idle) = self.inner.pop_idle() {
            let id = idle.id.clone();
            let guard = IdleGuard {
                pool: &self.inner,
                session: Some(idle),
            };
            if self.inner.config.validate_on_acquire && !self.inner.ping(&id).await {
                continue;
            }
            return guard.take();
        }
        None
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            max_size: self.inner.config.max_size,
            idle: self.inner.idle.lock().len(),
            leased: self.inner.leased.load(Ordering::Relaxed),
            created: c.created.load(Ordering::Relaxed),
            destroyed: c.destroyed.load(Ordering::Relaxed),
            acquired: c.acquired.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            invalidated: c.invalidated.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
        }
    }

    /// Run one reaper sweep now. Returns the number of sessions evicted.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Close the pool. Idle sessions are deleted now, leased ones when
    /// they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        self.inner.semaphore.close();
        let idle: Vec<IdleSession> = self.inner.idle.lock().drain(..).collect();
        let timeout = self.inner.config.call_timeout;
        for s in &idle {
            self.inner.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            delete_session(self.inner.backend.as_ref(), &s.id, timeout).await;
        }
        info!(deleted = idle.len(), "session pool closed");
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool").field("stats", &self.stats()).finish()
    }
}

fn spawn_reaper(inner: &Arc<PoolInner>, every: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.closed.load(Ordering::Relaxed) {
                break;
            }
            let evicted = inner.evict_expired();
            if evicted > 0 {
                debug!(evicted, "reaped idle sessions");
            }
        }
    });
}
