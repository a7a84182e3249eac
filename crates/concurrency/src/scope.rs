//! Scope guards
//!
//! A [`TransactionScope`] makes its transaction ambient until it is closed;
//! a [`CommittedScope`] makes no transaction ambient, so reads see
//! committed state only. Scopes nest strictly: they must be closed in the
//! reverse order they were entered.
//!
//! Dropping a transaction scope closes it without committing. The
//! transaction is set aside and can be re-entered with
//! [`Transaction::enter`](crate::Transaction::enter), at which point its
//! baselines are re-checked.

use crate::manager::TransactionManager;
use crate::transaction::{CommitInfo, Transaction};
use tracing::error;
use typegraph_core::{Error, Result};

/// Guard keeping a transaction ambient
#[must_use = "dropping a scope exits it without committing"]
pub struct TransactionScope {
    manager: TransactionManager,
    transaction: Transaction,
    frame: u64,
    is_root: bool,
    closed: bool,
}

impl TransactionScope {
    pub(crate) fn new(
        manager: TransactionManager,
        transaction: Transaction,
        frame: u64,
        is_root: bool,
    ) -> Self {
        Self {
            manager,
            transaction,
            frame,
            is_root,
            closed: false,
        }
    }

    /// Transaction this scope keeps ambient
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Whether this is the outermost scope of its transaction
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Commit the transaction
    ///
    /// # Errors
    /// - `InvalidOperation` if this is not the root scope, or nested scopes
    ///   of the transaction are still open
    /// - `Rejected` if the transaction was or became rejected; nothing was
    ///   applied
    /// - `UnbalancedCommit` if a nested transaction started from a finally
    ///   listener was left running; the commit itself succeeded
    /// - `InvalidOperation` if a finally listener left a scope open; the
    ///   commit succeeded and the scope was force-closed
    pub fn accept(mut self) -> Result<CommitInfo> {
        if !self.is_root {
            return Err(Error::invalid_operation(format!(
                "only the root scope of transaction {} can accept it",
                self.transaction.id()
            )));
        }
        let transaction = self.transaction.clone();
        transaction.commit(&mut self)
    }

    /// Reject the transaction and exit this scope
    pub fn reject(mut self, reason: impl Into<String>) -> Result<()> {
        let rejected = self.transaction.reject(reason);
        let closed = self.close();
        rejected.and(closed)
    }

    /// Exit this scope without committing
    pub fn exit(mut self) -> Result<()> {
        self.close()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transaction.scope_exit();
        self.manager.pop_frame(self.frame)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(
                target: "typegraph::txn",
                txn_id = self.transaction.id(),
                error = %err,
                "Failed to exit transaction scope"
            );
        }
    }
}

/// Guard keeping no transaction ambient
#[must_use = "dropping a committed scope exits it"]
pub struct CommittedScope {
    manager: TransactionManager,
    frame: u64,
    closed: bool,
}

impl CommittedScope {
    pub(crate) fn new(manager: TransactionManager, frame: u64) -> Self {
        Self {
            manager,
            frame,
            closed: false,
        }
    }

    pub(crate) fn frame(&self) -> u64 {
        self.frame
    }

    /// Exit this scope, restoring the previous ambient transaction
    pub fn exit(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.manager.pop_frame(self.frame)
    }
}

impl Drop for CommittedScope {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(target: "typegraph::txn", error = %err, "Failed to exit committed scope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::state::{ContainerKind, Member};
    use typegraph_core::Rejection;

    #[test]
    fn test_drop_sets_transaction_aside() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let tx = {
            let scope = manager.enter().unwrap();
            container
                .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
                .unwrap();
            scope.transaction().clone()
        };

        assert!(manager.ambient().is_none());
        assert!(!tx.is_settled());
        assert_eq!(container.version(), 1);

        // Re-entering and accepting commits the set-aside changes
        let scope = tx.enter().unwrap();
        assert!(scope.is_root());
        scope.accept().unwrap();
        assert_eq!(container.version(), manager.current_version());
        container.read_committed(|state| {
            assert_eq!(state.as_complex().unwrap().get("height"), Some(&Member::from(1)));
        });
    }

    #[test]
    fn test_nested_scope_cannot_accept() {
        let manager = TransactionManager::new();
        let outer = manager.enter().unwrap();
        let inner = manager.enter().unwrap();

        assert!(matches!(inner.accept(), Err(Error::InvalidOperation(_))));
        outer.exit().unwrap();
    }

    #[test]
    fn test_accept_with_open_nested_scope_fails() {
        let manager = TransactionManager::new();
        let tx = manager.begin();
        let outer = tx.enter().unwrap();
        let inner = tx.enter().unwrap();

        assert!(matches!(outer.accept(), Err(Error::InvalidOperation(_))));
        drop(inner);
        assert_eq!(tx.scope_count(), 0);
        assert!(!tx.is_settled());
    }

    #[test]
    fn test_reject_scope() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let scope = manager.enter().unwrap();
        container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap();
        let tx = scope.transaction().clone();

        scope.reject("changed my mind").unwrap();
        assert_eq!(tx.status().to_string(), "rejected");
        assert!(manager.ambient().is_none());
        assert_eq!(container.version(), 1);
        assert!(matches!(
            tx.enter(),
            Err(Error::Rejected(Rejection::Vetoed(_)))
        ));
    }

    #[test]
    fn test_committed_scope_reads_committed_state() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let scope = manager.enter().unwrap();
        container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap();

        let committed = manager.enter_committed();
        container.read(|state| assert!(state.as_complex().unwrap().is_empty()));
        committed.exit().unwrap();

        container.read(|state| assert_eq!(state.as_complex().unwrap().len(), 1));
        scope.accept().unwrap();
    }
}
