//! Transaction manager: the ambient transaction context
//!
//! The manager is the one place holding process-wide transaction state:
//!
//! 1. The global version counter stamped on containers at commit
//! 2. The transaction id counter
//! 3. The ambient slot: which transaction (if any) reads and writes see
//! 4. The scope stack restoring the previous ambient slot on scope exit
//! 5. The commit-finally stack of transactions running finally listeners
//!
//! Managers are cheap to clone and independent of each other, so each test
//! (or each object graph) can run under its own context.
//!
//! ## Scope stack
//!
//! ```text
//! enter()           push frame { previous: ambient }, ambient = tx
//! enter_committed() push frame { previous: ambient }, ambient = None
//! exit              pop frame, ambient = frame.previous
//! ```
//!
//! Frames must be exited in LIFO order; an out-of-order exit is reported as
//! an error and the stack is repaired around the removed frame.

use crate::changeset::Changeset;
use crate::config::TransactionConfig;
use crate::container::Container;
use crate::scope::{CommittedScope, TransactionScope};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use typegraph_core::{Error, Rejection, Result};

struct ScopeFrame {
    id: u64,
    previous: Option<Transaction>,
}

struct ManagerInner {
    config: TransactionConfig,
    /// Global version counter
    ///
    /// Monotonically increasing. Each committed transaction increments by 1.
    version: AtomicU64,
    next_txn_id: AtomicU64,
    next_frame_id: AtomicU64,
    ambient: Mutex<Option<Transaction>>,
    frames: Mutex<Vec<ScopeFrame>>,
    committing: Mutex<Vec<Transaction>>,
}

/// Coordinates transactions sharing one object graph
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Create a manager with the default configuration
    pub fn new() -> Self {
        Self::from_validated(TransactionConfig::default())
    }

    /// Create a manager with a specific configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration fails
    /// [`TransactionConfig::validate`].
    pub fn with_config(config: TransactionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: TransactionConfig) -> Self {
        TransactionManager {
            inner: Arc::new(ManagerInner {
                version: AtomicU64::new(config.initial_version),
                next_txn_id: AtomicU64::new(1),
                next_frame_id: AtomicU64::new(1),
                ambient: Mutex::new(None),
                frames: Mutex::new(Vec::new()),
                committing: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    /// Get current global version
    pub fn current_version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Allocate next commit version (increment global version)
    ///
    /// Called once per committing transaction; every container it touched
    /// is stamped with the same version.
    pub fn allocate_version(&self) -> u64 {
        self.inner.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.inner.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create a transaction without entering it
    pub fn begin(&self) -> Transaction {
        let transaction = Transaction::new(self, self.next_txn_id());
        debug!(target: "typegraph::txn", txn_id = transaction.id(), "Transaction started");
        transaction
    }

    /// Enter a scope of the ambient transaction, or of a new one
    pub fn enter(&self) -> Result<TransactionScope> {
        match self.ambient() {
            Some(transaction) => self.enter_transaction(&transaction),
            None => self.enter_transaction(&self.begin()),
        }
    }

    pub(crate) fn enter_transaction(&self, transaction: &Transaction) -> Result<TransactionScope> {
        let is_root = transaction.scope_enter()?;
        let frame = self.push_frame(Some(transaction.clone()));
        trace!(target: "typegraph::txn", txn_id = transaction.id(), frame, is_root, "Scope entered");
        Ok(TransactionScope::new(
            self.clone(),
            transaction.clone(),
            frame,
            is_root,
        ))
    }

    /// Enter a scope in which no transaction is ambient
    pub fn enter_committed(&self) -> CommittedScope {
        let frame = self.push_frame(None);
        CommittedScope::new(self.clone(), frame)
    }

    /// The ambient transaction, if any
    pub fn ambient(&self) -> Option<Transaction> {
        self.inner.ambient.lock().clone()
    }

    /// Number of open scopes, transaction and committed
    pub fn scope_depth(&self) -> usize {
        self.inner.frames.lock().len()
    }

    /// Run `f` in a scope
    ///
    /// Joins the ambient transaction if there is one. When `f` succeeds the
    /// root scope commits and a nested scope just exits. When `f` fails the
    /// transaction is rejected and the error returned.
    pub fn run<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let scope = self.enter()?;
        let transaction = scope.transaction().clone();
        match f(&transaction) {
            Ok(value) => {
                if scope.is_root() {
                    scope.accept()?;
                } else {
                    scope.exit()?;
                }
                Ok(value)
            }
            Err(err) => {
                let rejection = match &err {
                    Error::Rejected(rejection) => rejection.clone(),
                    other => Rejection::vetoed(other.to_string()),
                };
                transaction.mark_rejected(rejection);
                scope.exit()?;
                Err(err)
            }
        }
    }

    /// Changesets for `container` held by transactions running finally listeners
    pub fn pending_changesets(&self, container: &Container) -> Vec<Changeset> {
        let committing = self.inner.committing.lock().clone();
        committing
            .iter()
            .filter_map(|transaction| transaction.get_changeset(container.uid()))
            .collect()
    }

    /// Whether any transaction is running finally listeners
    pub fn is_committing(&self) -> bool {
        !self.inner.committing.lock().is_empty()
    }

    // === Scope stack ===

    pub(crate) fn push_frame(&self, ambient: Option<Transaction>) -> u64 {
        let id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
        let mut frames = self.inner.frames.lock();
        let previous = std::mem::replace(&mut *self.inner.ambient.lock(), ambient);
        frames.push(ScopeFrame { id, previous });
        id
    }

    pub(crate) fn pop_frame(&self, id: u64) -> Result<()> {
        let mut frames = self.inner.frames.lock();
        let Some(position) = frames.iter().rposition(|frame| frame.id == id) else {
            return Err(Error::invalid_operation(format!("scope {} is not open", id)));
        };
        let frame = frames.remove(position);
        if position == frames.len() {
            *self.inner.ambient.lock() = frame.previous;
            return Ok(());
        }
        // The frame above now restores what this one would have
        frames[position].previous = frame.previous;
        Err(Error::invalid_operation(format!(
            "scope {} exited out of order ({} scopes still open above it)",
            id,
            frames.len() - position
        )))
    }

    /// Force-close every frame opened after frame `id`
    ///
    /// Restores the ambient slot `id` saw while it was on top and returns
    /// how many frames were closed.
    pub(crate) fn unwind_above(&self, id: u64) -> usize {
        let mut frames = self.inner.frames.lock();
        let Some(position) = frames.iter().rposition(|frame| frame.id == id) else {
            return 0;
        };
        let mut leaked = frames.drain(position + 1..);
        let count = leaked.len();
        if let Some(first) = leaked.next() {
            *self.inner.ambient.lock() = first.previous;
        }
        count
    }

    // === Commit-finally stack ===

    pub(crate) fn push_committing(&self, transaction: Transaction) {
        self.inner.committing.lock().push(transaction);
    }

    pub(crate) fn pop_committing(&self, transaction: &Transaction) -> Result<()> {
        let mut committing = self.inner.committing.lock();
        let found = committing.last().map(|top| top.id());
        if found == Some(transaction.id()) {
            committing.pop();
            return Ok(());
        }
        committing.retain(|entry| entry != transaction);
        Err(Error::UnbalancedCommit {
            expected: transaction.id(),
            found,
        })
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("version", &self.current_version())
            .field("scope_depth", &self.scope_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_manager() {
        let manager = TransactionManager::new();
        assert_eq!(manager.current_version(), 1);
        assert!(manager.ambient().is_none());
        assert_eq!(manager.scope_depth(), 0);
    }

    #[test]
    fn test_with_config_sets_initial_version() {
        let manager = TransactionManager::with_config(TransactionConfig::default().with_initial_version(100)).unwrap();
        assert_eq!(manager.current_version(), 100);
    }

    #[test]
    fn test_with_config_rejects_initial_version_below_base() {
        let config = TransactionConfig::default().with_initial_version(0);
        assert!(matches!(
            TransactionManager::with_config(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_next_txn_id() {
        let manager = TransactionManager::new();
        assert_eq!(manager.next_txn_id(), 1);
        assert_eq!(manager.next_txn_id(), 2);
        assert_eq!(manager.next_txn_id(), 3);
    }

    #[test]
    fn test_allocate_version() {
        let manager = TransactionManager::with_config(TransactionConfig::default().with_initial_version(10)).unwrap();
        assert_eq!(manager.allocate_version(), 11);
        assert_eq!(manager.allocate_version(), 12);
        assert_eq!(manager.current_version(), 12);
    }

    #[test]
    fn test_enter_sets_and_restores_ambient() {
        let manager = TransactionManager::new();
        let scope = manager.enter().unwrap();
        let tx = scope.transaction().clone();
        assert_eq!(manager.ambient(), Some(tx.clone()));

        // Nested enter joins the ambient transaction
        let nested = manager.enter().unwrap();
        assert_eq!(nested.transaction(), &tx);
        assert!(!nested.is_root());
        nested.exit().unwrap();

        scope.exit().unwrap();
        assert!(manager.ambient().is_none());
    }

    #[test]
    fn test_committed_scope_hides_ambient() {
        let manager = TransactionManager::new();
        let scope = manager.enter().unwrap();
        {
            let committed = manager.enter_committed();
            assert!(manager.ambient().is_none());
            committed.exit().unwrap();
        }
        assert!(manager.ambient().is_some());
        scope.exit().unwrap();
    }

    #[test]
    fn test_out_of_order_exit_is_reported_and_repaired() {
        let manager = TransactionManager::new();
        let outer = manager.enter().unwrap();
        let committed = manager.enter_committed();

        let err = outer.exit().unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        // Exiting the remaining frame restores the state before `outer`
        committed.exit().unwrap();
        assert!(manager.ambient().is_none());
        assert_eq!(manager.scope_depth(), 0);
    }

    #[test]
    fn test_run_commits_root_scope() {
        let manager = TransactionManager::new();
        let id = manager.run(|tx| Ok(tx.id())).unwrap();
        assert_eq!(id, 1);
        assert!(manager.ambient().is_none());
    }

    #[test]
    fn test_run_rejects_on_error() {
        let manager = TransactionManager::new();
        let mut seen = None;
        let result: Result<()> = manager.run(|tx| {
            seen = Some(tx.clone());
            Err(Error::invalid_operation("boom"))
        });

        assert!(result.is_err());
        let tx = seen.unwrap();
        assert!(tx.is_rejected());
        assert!(manager.ambient().is_none());
    }

    #[test]
    fn test_unwind_above_restores_ambient() {
        let manager = TransactionManager::new();
        let committed = manager.enter_committed();
        let leaked = manager.enter().unwrap();
        let _nested = manager.enter().unwrap();
        assert!(manager.ambient().is_some());

        assert_eq!(manager.unwind_above(committed.frame()), 2);
        assert!(manager.ambient().is_none());
        assert_eq!(manager.scope_depth(), 1);
        committed.exit().unwrap();
        assert_eq!(manager.scope_depth(), 0);

        // Closing a force-closed scope reports it is no longer open
        assert!(matches!(leaked.exit(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_unbalanced_commit_stack() {
        let manager = TransactionManager::new();
        let a = manager.begin();
        let b = manager.begin();
        manager.push_committing(a.clone());
        manager.push_committing(b.clone());

        let err = manager.pop_committing(&a).unwrap_err();
        assert_eq!(
            err,
            Error::UnbalancedCommit {
                expected: a.id(),
                found: Some(b.id()),
            }
        );
        manager.pop_committing(&b).unwrap();
        assert!(!manager.is_committing());
    }
}
