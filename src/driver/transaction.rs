//! Transaction state machine.
//!
//! ```text
//! None --begin--> Active --commit--> Committing --> (Committed) --> None
//!                   |   \--rollback-> Aborting ---> (Aborted)   --> None
//!                   \--backend abort--> Aborted --rollback--^
//! ```
//!
//! The controller performs no I/O. The connection asks it which transaction
//! context a statement runs in, performs the round-trip, and reports back.

use crate::backend::{BackendError, ErrorKind, TxControl, TxId};
use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Consistency requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Read-write, strictly serializable.
    #[default]
    Serializable,
    /// Read-only over a consistent snapshot taken at transaction start.
    Snapshot,
    /// Read-only, may observe data that is a few seconds stale.
    Stale,
    /// Read-only, each read sees committed data but reads are not consistent
    /// with each other.
    Online,
}

impl IsolationMode {
    pub fn is_read_only(self) -> bool {
        !matches!(self, IsolationMode::Serializable)
    }

    /// What the caller gives up by choosing this mode.
    pub fn tradeoff(self) -> &'static str {
        match self {
            IsolationMode::Serializable => {
                "strongest guarantee; conflicting transactions are aborted and must be retried"
            }
            IsolationMode::Snapshot => {
                "read-only; sees a single consistent snapshot, never blocks writers"
            }
            IsolationMode::Stale => {
                "read-only; consistent but possibly lagging behind the latest commits"
            }
            IsolationMode::Online => {
                "read-only; every read is fresh but reads are not mutually consistent"
            }
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationMode::Serializable => "serializable",
            IsolationMode::Snapshot => "snapshot",
            IsolationMode::Stale => "stale",
            IsolationMode::Online => "online",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// No explicit transaction; statements run in implicit ones.
    None,
    Active,
    Committing,
    Committed,
    Aborting,
    /// Invalidated by the backend; only rollback is accepted.
    Aborted,
}

/// Per-connection transaction state.
#[derive(Debug)]
pub struct TransactionController {
    status: TxStatus,
    default_isolation: IsolationMode,
    isolation: IsolationMode,
    tx_id: Option<TxId>,
    abort_reason: Option<String>,
}

impl TransactionController {
    pub fn new(default_isolation: IsolationMode) -> Self {
        Self {
            status: TxStatus::None,
            default_isolation,
            isolation: default_isolation,
            tx_id: None,
            abort_reason: None,
        }
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Isolation of the open transaction, or the default when none is open.
    pub fn isolation(&self) -> IsolationMode {
        if self.in_transaction() {
            self.isolation
        } else {
            self.default_isolation
        }
    }

    pub fn default_isolation(&self) -> IsolationMode {
        self.default_isolation
    }

    pub fn set_default_isolation(&mut self, isolation: IsolationMode) -> DriverResult<()> {
        if self.in_transaction() {
            return Err(DriverError::invalid_state(
                "cannot change the default isolation while a transaction is open",
            ));
        }
        self.default_isolation = isolation;
        Ok(())
    }

    /// Backend id of the open transaction, once known.
    pub fn tx_id(&self) -> Option<&TxId> {
        self.tx_id.as_ref()
    }

    /// True while an explicit transaction is open, including an aborted one.
    pub fn in_transaction(&self) -> bool {
        self.status != TxStatus::None
    }

    pub fn begin(&mut self, isolation: IsolationMode) -> DriverResult<()> {
        if self.status != TxStatus::None {
            return Err(DriverError::invalid_state(format!(
                "cannot begin a transaction in state {:?}",
                self.status
            )));
        }
        debug!(%isolation, "transaction begin");
        self.status = TxStatus::Active;
        self.isolation = isolation;
        self.tx_id = None;
        self.abort_reason = None;
        Ok(())
    }

    /// Record the id returned by an eager begin.
    pub fn on_begun(&mut self, tx_id: TxId) {
        if self.status == TxStatus::Active {
            debug!(tx = %tx_id, "transaction started");
            self.tx_id = Some(tx_id);
        }
    }

    /// Undo `begin` after the eager begin round-trip failed.
    pub fn abandon(&mut self) {
        self.reset();
    }

    /// Transaction context for the next statement.
    pub fn statement_context(&self) -> DriverResult<TxControl> {
        match self.status {
            TxStatus::None => Ok(TxControl::Implicit(self.default_isolation)),
            TxStatus::Active => Ok(match &self.tx_id {
                Some(id) => TxControl::Continue(id.clone()),
                None => TxControl::Begin(self.isolation),
            }),
            TxStatus::Aborted => Err(self.aborted_error()),
            status => Err(DriverError::invalid_state(format!(
                "cannot execute a statement in state {:?}",
                status
            ))),
        }
    }

    /// A statement was accepted by the backend.
    ///
    /// The first statement of a lazily begun transaction reports its id.
    pub fn on_statement_started(&mut self, tx_id: Option<&TxId>) {
        if self.status == TxStatus::Active
            && self.tx_id.is_none()
            && let Some(id) = tx_id
        {
            debug!(tx = %id, "transaction started by first statement");
            self.tx_id = Some(id.clone());
        }
    }

    /// Inspect a backend failure. Returns true if the transaction was aborted.
    pub fn on_backend_error(&mut self, err: &BackendError) -> bool {
        match err.kind() {
            ErrorKind::TransactionAborted | ErrorKind::SessionInvalid => {
                self.force_abort(err.to_string())
            }
            ErrorKind::Retryable | ErrorKind::Fatal => false,
        }
    }

    /// The session under the transaction is gone (invalidated or timed out).
    pub fn on_session_lost(&mut self, reason: impl Into<String>) -> bool {
        self.force_abort(reason.into())
    }

    fn force_abort(&mut self, reason: String) -> bool {
        if self.status != TxStatus::Active {
            return false;
        }
        warn!(tx = ?self.tx_id, %reason, "transaction aborted by backend");
        self.status = TxStatus::Aborted;
        self.abort_reason = Some(reason);
        true
    }

    /// Start committing. Returns the id to commit, `None` if the transaction
    /// never reached the backend.
    pub fn begin_commit(&mut self) -> DriverResult<Option<TxId>> {
        match self.status {
            TxStatus::Active => {
                self.status = TxStatus::Committing;
                Ok(self.tx_id.clone())
            }
            TxStatus::Aborted => Err(self.aborted_error()),
            status => Err(DriverError::invalid_state(format!(
                "cannot commit in state {:?}",
                status
            ))),
        }
    }

    /// The commit round-trip finished, successfully or not. The controller
    /// is ready for a new transaction afterwards.
    pub fn complete_commit(&mut self, committed: bool) -> TxStatus {
        let outcome = if committed {
            TxStatus::Committed
        } else {
            TxStatus::Aborted
        };
        debug!(tx = ?self.tx_id, ?outcome, "commit finished");
        self.reset();
        outcome
    }

    /// Start rolling back. Returns the id to roll back, `None` when there
    /// is nothing to undo on the backend.
    pub fn begin_rollback(&mut self) -> DriverResult<Option<TxId>> {
        match self.status {
            TxStatus::Active => {
                self.status = TxStatus::Aborting;
                Ok(self.tx_id.clone())
            }
            // The backend already discarded it.
            TxStatus::Aborted => {
                self.status = TxStatus::Aborting;
                Ok(None)
            }
            status => Err(DriverError::invalid_state(format!(
                "cannot roll back in state {:?}",
                status
            ))),
        }
    }

    pub fn complete_rollback(&mut self) -> TxStatus {
        debug!(tx = ?self.tx_id, "rollback finished");
        self.reset();
        TxStatus::Aborted
    }

    fn reset(&mut self) {
        self.status = TxStatus::None;
        self.isolation = self.default_isolation;
        self.tx_id = None;
        self.abort_reason = None;
    }

    fn aborted_error(&self) -> DriverError {
        DriverError::TransactionAborted(
            self.abort_reason
                .clone()
                .unwrap_or_else(|| "transaction was aborted".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StatusCode;

    fn tx(id: &str) -> TxId {
        TxId::new(id)
    }

    #[test]
    fn test_implicit_statements_use_default_isolation() {
        let ctl = TransactionController::new(IsolationMode::Snapshot);
        assert_eq!(
            ctl.statement_context().unwrap(),
            TxControl::Implicit(IsolationMode::Snapshot)
        );
        assert!(!ctl.in_transaction());
    }

    #[test]
    fn test_lazy_transaction_lifecycle() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        ctl.begin(IsolationMode::Serializable).unwrap();
        assert_eq!(
            ctl.statement_context().unwrap(),
            TxControl::Begin(IsolationMode::Serializable)
        );

        ctl.on_statement_started(Some(&tx("tx-1")));
        assert_eq!(ctl.statement_context().unwrap(), TxControl::Continue(tx("tx-1")));

        // Later statements do not replace the id.
        ctl.on_statement_started(Some(&tx("tx-2")));
        assert_eq!(ctl.tx_id(), Some(&tx("tx-1")));

        assert_eq!(ctl.begin_commit().unwrap(), Some(tx("tx-1")));
        assert_eq!(ctl.status(), TxStatus::Committing);
        assert_eq!(ctl.complete_commit(true), TxStatus::Committed);
        assert_eq!(ctl.status(), TxStatus::None);
        assert_eq!(ctl.tx_id(), None);
    }

    #[test]
    fn test_begin_only_from_none() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        ctl.begin(IsolationMode::Serializable).unwrap();
        assert!(matches!(
            ctl.begin(IsolationMode::Serializable),
            Err(DriverError::InvalidState(_))
        ));
    }

    #[test]
    fn test_commit_and_rollback_require_transaction() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        assert!(matches!(ctl.begin_commit(), Err(DriverError::InvalidState(_))));
        assert!(matches!(ctl.begin_rollback(), Err(DriverError::InvalidState(_))));
    }

    #[test]
    fn test_backend_abort_poisons_transaction() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        ctl.begin(IsolationMode::Serializable).unwrap();
        ctl.on_statement_started(Some(&tx("tx-1")));

        let err = BackendError::new(StatusCode::Aborted, "locks invalidated");
        assert!(ctl.on_backend_error(&err));
        assert_eq!(ctl.status(), TxStatus::Aborted);

        for _ in 0..3 {
            assert!(matches!(
                ctl.statement_context(),
                Err(DriverError::TransactionAborted(_))
            ));
        }
        assert!(matches!(
            ctl.begin_commit(),
            Err(DriverError::TransactionAborted(_))
        ));

        // Nothing left to undo on the backend.
        assert_eq!(ctl.begin_rollback().unwrap(), None);
        ctl.complete_rollback();
        assert_eq!(ctl.status(), TxStatus::None);
        assert!(ctl.statement_context().is_ok());
    }

    #[test]
    fn test_statement_errors_do_not_abort() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        ctl.begin(IsolationMode::Serializable).unwrap();
        let err = BackendError::new(StatusCode::SchemeError, "no such table");
        assert!(!ctl.on_backend_error(&err));
        assert_eq!(ctl.status(), TxStatus::Active);
    }

    #[test]
    fn test_implicit_errors_leave_state_alone() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        let err = BackendError::new(StatusCode::Aborted, "conflict");
        assert!(!ctl.on_backend_error(&err));
        assert_eq!(ctl.status(), TxStatus::None);
    }

    #[test]
    fn test_default_isolation_locked_during_transaction() {
        let mut ctl = TransactionController::new(IsolationMode::Serializable);
        ctl.set_default_isolation(IsolationMode::Stale).unwrap();
        ctl.begin(IsolationMode::Serializable).unwrap();
        assert_eq!(ctl.isolation(), IsolationMode::Serializable);
        assert!(ctl.set_default_isolation(IsolationMode::Online).is_err());
        ctl.begin_rollback().unwrap();
        ctl.complete_rollback();
        assert_eq!(ctl.isolation(), IsolationMode::Stale);
    }

    #[test]
    fn test_isolation_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: IsolationMode,
        }
        let w: Wrapper = toml::from_str("mode = \"stale\"").unwrap();
        assert_eq!(w.mode, IsolationMode::Stale);
        assert!(w.mode.is_read_only());
        assert!(!IsolationMode::Serializable.is_read_only());
    }
}
