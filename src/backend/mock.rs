//! In-process scripted backend.
//!
//! Queries are answered from scripts registered by exact text. Unscripted
//! queries succeed with no columns and a single empty part, which is what
//! the engine returns for data-modifying statements. Every call is recorded
//! so tests can assert on what reached the backend and in which order.

use super::{
    Backend, BackendError, Column, PartStream, QueryRequest, QueryResponse, ResultPart,
    SessionId, SessionStatus, StatusCode, TxControl, TxId,
};
use crate::driver::IsolationMode;
use crate::types::{NativeType, NativeValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Scripted reply to one query text.
#[derive(Debug, Clone, Default)]
pub struct QueryScript {
    columns: Vec<Column>,
    parts: Vec<Vec<Vec<NativeValue>>>,
    fail_at: Option<(usize, BackendError)>,
    reject: Option<BackendError>,
}

impl QueryScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The query is refused before any part is produced.
    pub fn rejected(err: BackendError) -> Self {
        Self {
            reject: Some(err),
            ..Self::default()
        }
    }

    pub fn column(mut self, name: &str, ty: NativeType) -> Self {
        self.columns.push(Column::new(name, ty));
        self
    }

    /// Append a part holding `rows`.
    pub fn part(mut self, rows: Vec<Vec<NativeValue>>) -> Self {
        self.parts.push(rows);
        self
    }

    /// Deliver `index` parts, then fail.
    pub fn fail_at_part(mut self, index: usize, err: BackendError) -> Self {
        self.fail_at = Some((index, err));
        self
    }
}

/// A query as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub session: SessionId,
    pub tx: TxControl,
    pub text: String,
    pub params: Vec<(String, NativeValue)>,
    pub fetch_size: Option<usize>,
}

/// Calls in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateSession(SessionId),
    DeleteSession(SessionId),
    KeepAlive(SessionId),
    Begin(SessionId, IsolationMode),
    Commit(SessionId, TxId),
    Rollback(SessionId, TxId),
    Execute(ExecutedQuery),
    Cancel(SessionId),
}

#[derive(Default)]
struct State {
    next_session: u64,
    next_tx: u64,
    live_sessions: HashSet<SessionId>,
    open_txs: HashMap<TxId, SessionId>,
    scripts: HashMap<String, QueryScript>,
    create_failures: VecDeque<BackendError>,
    commit_failures: VecDeque<BackendError>,
    events: Vec<Event>,
    parts_fetched: u64,
    fetch_delay: Option<Duration>,
    query_delay: Option<Duration>,
    session_call_delay: Option<Duration>,
}

impl State {
    fn check_session(&self, session: &SessionId) -> Result<(), BackendError> {
        if self.live_sessions.contains(session) {
            Ok(())
        } else {
            Err(BackendError::new(
                StatusCode::BadSession,
                format!("session {} not found", session),
            ))
        }
    }

    fn new_tx(&mut self, session: &SessionId) -> TxId {
        self.next_tx += 1;
        let id = TxId::new(format!("tx-{}", self.next_tx));
        self.open_txs.insert(id.clone(), session.clone());
        id
    }
}

/// Scripted [`Backend`] for tests.
#[derive(Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, text: &str, script: QueryScript) {
        self.state.lock().scripts.insert(text.trim().to_string(), script);
    }

    /// The next `create_session` call fails with `err`. Calls queue up.
    pub fn fail_next_create(&self, err: BackendError) {
        self.state.lock().create_failures.push_back(err);
    }

    pub fn fail_next_commit(&self, err: BackendError) {
        self.state.lock().commit_failures.push_back(err);
    }

    /// Forget a session server-side, as if it expired.
    pub fn kill_session(&self, session: &SessionId) {
        self.state.lock().live_sessions.remove(session);
    }

    /// Delay every part delivery.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state.lock().fetch_delay = delay;
    }

    /// Delay every query before it reaches the backend.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        self.state.lock().query_delay = delay;
    }

    /// Delay every create, keep-alive and delete call.
    pub fn set_session_call_delay(&self, delay: Option<Duration>) {
        self.state.lock().session_call_delay = delay;
    }

    async fn session_call_delay(&self) {
        let delay = self.state.lock().session_call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn queries(&self) -> Vec<ExecutedQuery> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Execute(q) => Some(q.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    pub fn sessions_created(&self) -> usize {
        self.count(|e| matches!(e, Event::CreateSession(_)))
    }

    pub fn sessions_deleted(&self) -> usize {
        self.count(|e| matches!(e, Event::DeleteSession(_)))
    }

    pub fn cancellations(&self) -> usize {
        self.count(|e| matches!(e, Event::Cancel(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(..)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(..)))
    }

    /// Parts handed out across all queries.
    pub fn parts_fetched(&self) -> u64 {
        self.state.lock().parts_fetched
    }

    pub fn open_transactions(&self) -> usize {
        self.state.lock().open_txs.len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create_session(&self) -> Result<SessionId, BackendError> {
        self.session_call_delay().await;
        let mut state = self.state.lock();
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        state.next_session += 1;
        let id = SessionId::new(format!("session-{}", state.next_session));
        state.live_sessions.insert(id.clone());
        state.events.push(Event::CreateSession(id.clone()));
        Ok(id)
    }

    async fn delete_session(&self, session: &SessionId) -> Result<(), BackendError> {
        self.session_call_delay().await;
        let mut state = self.state.lock();
        state.live_sessions.remove(session);
        state.open_txs.retain(|_, s| s != session);
        state.events.push(Event::DeleteSession(session.clone()));
        Ok(())
    }

    async fn keep_alive(&self, session: &SessionId) -> Result<SessionStatus, BackendError> {
        self.session_call_delay().await;
        let mut state = self.state.lock();
        state.events.push(Event::KeepAlive(session.clone()));
        state.check_session(session)?;
        Ok(SessionStatus::Ready)
    }

    fn is_session_closed(&self, session: &SessionId) -> bool {
        !self.state.lock().live_sessions.contains(session)
    }

    async fn begin_transaction(
        &self,
        session: &SessionId,
        isolation: IsolationMode,
    ) -> Result<TxId, BackendError> {
        let mut state = self.state.lock();
        state.check_session(session)?;
        state.events.push(Event::Begin(session.clone(), isolation));
        Ok(state.new_tx(session))
    }

    async fn commit_transaction(
        &self,
        session: &SessionId,
        tx: &TxId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_session(session)?;
        state.events.push(Event::Commit(session.clone(), tx.clone()));
        if state.open_txs.remove(tx).is_none() {
            return Err(BackendError::new(
                StatusCode::NotFound,
                format!("transaction {} not found", tx),
            ));
        }
        match state.commit_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback_transaction(
        &self,
        session: &SessionId,
        tx: &TxId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.check_session(session)?;
        state.events.push(Event::Rollback(session.clone(), tx.clone()));
        state.open_txs.remove(tx);
        Ok(())
    }

    async fn execute_query(
        &self,
        session: &SessionId,
        tx: &TxControl,
        request: &QueryRequest,
    ) -> Result<QueryResponse, BackendError> {
        let delay = self.state.lock().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.check_session(session)?;
        state.events.push(Event::Execute(ExecutedQuery {
            session: session.clone(),
            tx: tx.clone(),
            text: request.text.clone(),
            params: request.params.clone(),
            fetch_size: request.fetch_size,
        }));

        let tx_id = match tx {
            TxControl::Implicit(_) => None,
            TxControl::Begin(_) => Some(state.new_tx(session)),
            TxControl::Continue(id) => {
                if !state.open_txs.contains_key(id) {
                    return Err(BackendError::new(
                        StatusCode::NotFound,
                        format!("transaction {} not found", id),
                    ));
                }
                Some(id.clone())
            }
        };

        let script = state
            .scripts
            .get(request.text.trim())
            .cloned()
            .unwrap_or_default();
        if let Some(err) = script.reject {
            if err.status() == StatusCode::Aborted
                && let Some(id) = &tx_id
            {
                state.open_txs.remove(id);
            }
            return Err(err);
        }

        let mut parts: VecDeque<ResultPart> = script
            .parts
            .into_iter()
            .map(|rows| ResultPart {
                rows,
                is_last: false,
            })
            .collect();
        match parts.back_mut() {
            Some(last) if script.fail_at.is_none() => last.is_last = true,
            Some(_) => {}
            None if script.fail_at.is_none() => parts.push_back(ResultPart {
                rows: Vec::new(),
                is_last: true,
            }),
            None => {}
        }

        Ok(QueryResponse {
            tx_id: tx_id.clone(),
            columns: script.columns,
            parts: Box::new(MockParts {
                state: self.state.clone(),
                session: session.clone(),
                tx_id,
                parts,
                fail_at: script.fail_at,
                delivered: 0,
                finished: false,
            }),
        })
    }
}

struct MockParts {
    state: Arc<Mutex<State>>,
    session: SessionId,
    tx_id: Option<TxId>,
    parts: VecDeque<ResultPart>,
    fail_at: Option<(usize, BackendError)>,
    delivered: usize,
    finished: bool,
}

#[async_trait]
impl PartStream for MockParts {
    async fn next_part(&mut self) -> Option<Result<ResultPart, BackendError>> {
        if self.finished {
            return None;
        }
        let delay = self.state.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((index, _)) = &self.fail_at
            && *index == self.delivered
            && let Some((_, err)) = self.fail_at.take()
        {
            self.finished = true;
            if err.status() == StatusCode::Aborted
                && let Some(id) = &self.tx_id
            {
                self.state.lock().open_txs.remove(id);
            }
            return Some(Err(err));
        }

        match self.parts.pop_front() {
            Some(part) => {
                self.delivered += 1;
                self.finished = part.is_last;
                self.state.lock().parts_fetched += 1;
                Some(Ok(part))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    async fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.parts.clear();
        self.state
            .lock()
            .events
            .push(Event::Cancel(self.session.clone()));
    }
}
