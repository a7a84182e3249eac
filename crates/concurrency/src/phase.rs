//! Commit phases
//!
//! Committing a transaction runs a fixed pipeline of phases:
//!
//! ```text
//! 1. InitPhase    - init listeners, leaves first, until nothing changes
//! 2. WillPhase    - lock changesets, run validators and will listeners
//! 3. DoPhase      - allocate a global version, apply change-refs and changesets
//! 4. FinallyPhase - run finally listeners outside any transaction
//! ```
//!
//! Init and will may reject the transaction. Once the do phase has applied
//! the changes the commit can no longer be undone; the finally phase only
//! reports an unbalanced commit stack or scopes its listeners left open.
//! Those scopes are force-closed first.

use crate::queue::InitQueue;
use crate::scope::TransactionScope;
use crate::transaction::{CommitInfo, Transaction, TransactionStatus};
use tracing::{debug, error, trace, warn};
use typegraph_core::{Error, Rejection, Result};

/// State shared by the phases of one commit
pub(crate) struct CommitContext<'a> {
    pub(crate) transaction: Transaction,
    pub(crate) scope: &'a mut TransactionScope,
    pub(crate) commit_version: Option<u64>,
}

impl<'a> CommitContext<'a> {
    pub(crate) fn new(transaction: Transaction, scope: &'a mut TransactionScope) -> Self {
        Self {
            transaction,
            scope,
            commit_version: None,
        }
    }

    pub(crate) fn into_info(self) -> CommitInfo {
        CommitInfo {
            transaction_id: self.transaction.id(),
            version: self.commit_version,
            changesets: self.transaction.changeset_count(),
            changes: self.transaction.version(),
        }
    }
}

/// One step of the commit sequence
pub(crate) trait CommitPhase: Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run the phase
    ///
    /// An error before changes are applied rejects the transaction.
    fn run(&self, context: &mut CommitContext<'_>) -> Result<()>;
}

/// Phases in commit order
pub(crate) fn commit_pipeline() -> [&'static dyn CommitPhase; 4] {
    [&InitPhase, &WillPhase, &DoPhase, &FinallyPhase]
}

/// Runs init listeners until every changeset settles
pub(crate) struct InitPhase;

impl CommitPhase for InitPhase {
    fn name(&self) -> &'static str {
        "init"
    }

    fn run(&self, context: &mut CommitContext<'_>) -> Result<()> {
        let transaction = &context.transaction;
        if transaction.version() == 0 {
            return Ok(());
        }
        let changesets = transaction.changesets();
        if !changesets
            .iter()
            .any(|changeset| changeset.owner().listeners().has_init())
        {
            return Ok(());
        }

        let max_passes = transaction.manager().config().max_init_passes;
        let mut queue = InitQueue::new();
        transaction.take_touched();
        for changeset in &changesets {
            queue.push(changeset);
        }

        let mut pops = 0usize;
        while let Some(uid) = queue.pop() {
            pops += 1;
            let budget = max_passes.saturating_mul(transaction.changeset_count().max(1));
            if pops > budget {
                return Err(Rejection::Unsettled { passes: pops }.into());
            }
            let Some(changeset) = transaction.get_changeset(uid) else {
                continue;
            };

            let mut passes = 0usize;
            loop {
                let version = changeset.transaction_version();
                let pending: Vec<_> = changeset
                    .owner()
                    .listeners()
                    .init()
                    .into_iter()
                    .filter(|(id, _)| changeset.listener_run(*id) != Some(version))
                    .collect();
                if pending.is_empty() {
                    break;
                }
                passes += 1;
                if passes > max_passes {
                    return Err(Rejection::Unsettled { passes: max_passes }.into());
                }

                for (id, listener) in pending {
                    trace!(
                        target: "typegraph::txn",
                        txn_id = transaction.id(),
                        uid = %uid,
                        net_order = changeset.net_order(),
                        "Running init listener"
                    );
                    listener.on_init(&changeset)?;
                    changeset.mark_listener_run(id, changeset.transaction_version());
                    if transaction.is_rejected() {
                        return Ok(());
                    }
                    for touched in transaction.take_touched() {
                        if touched == uid {
                            continue;
                        }
                        if let Some(other) = transaction.get_changeset(touched) {
                            queue.push(&other);
                        }
                    }
                }
            }

            queue.settle(uid, changeset.transaction_version());
            for (_, parent) in changeset.parents() {
                queue.push(&parent);
            }
        }

        debug!(
            target: "typegraph::txn",
            txn_id = transaction.id(),
            pops,
            changesets = transaction.changeset_count(),
            "Init phase settled"
        );
        Ok(())
    }
}

/// Locks changesets, then validates and runs will listeners
pub(crate) struct WillPhase;

impl CommitPhase for WillPhase {
    fn name(&self) -> &'static str {
        "will"
    }

    fn run(&self, context: &mut CommitContext<'_>) -> Result<()> {
        let transaction = &context.transaction;
        transaction.set_status(TransactionStatus::Will);
        transaction.mark_all_read_only();

        for changeset in transaction.changesets() {
            let owner = changeset.owner();
            let errors = owner.validate(&changeset.projected_state());
            if !errors.is_empty() {
                return Err(Rejection::Validation(errors).into());
            }
            for (_, listener) in owner.listeners().will() {
                listener.on_will(&changeset)?;
                if transaction.is_rejected() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Applies every change and stamps the commit version
pub(crate) struct DoPhase;

impl CommitPhase for DoPhase {
    fn name(&self) -> &'static str {
        "do"
    }

    fn run(&self, context: &mut CommitContext<'_>) -> Result<()> {
        let transaction = context.transaction.clone();

        if transaction.version() > 0 {
            // Replay everything before touching any container
            let changesets = transaction.changesets();
            let states = changesets
                .iter()
                .map(|changeset| changeset.replay())
                .collect::<Result<Vec<_>>>()?;

            transaction.set_status(TransactionStatus::Do);
            let version = transaction.manager().allocate_version();
            for change_ref in transaction.change_refs() {
                change_ref.apply();
            }
            for (changeset, state) in changesets.iter().zip(states) {
                changeset.apply_to(state, version);
            }
            context.commit_version = Some(version);
            debug!(
                target: "typegraph::txn",
                txn_id = transaction.id(),
                version,
                changesets = changesets.len(),
                "Changes applied"
            );
        } else {
            transaction.set_status(TransactionStatus::Do);
        }

        if let Err(err) = context.scope.close() {
            error!(target: "typegraph::txn", txn_id = transaction.id(), error = %err, "Failed to close committing scope");
        }
        Ok(())
    }
}

/// Runs finally listeners in a committed scope
pub(crate) struct FinallyPhase;

impl CommitPhase for FinallyPhase {
    fn name(&self) -> &'static str {
        "finally"
    }

    fn run(&self, context: &mut CommitContext<'_>) -> Result<()> {
        let transaction = context.transaction.clone();
        let manager = transaction.manager().clone();
        transaction.set_status(TransactionStatus::Finally);
        manager.push_committing(transaction.clone());

        let committed = manager.enter_committed();
        for changeset in transaction.changesets() {
            for (_, listener) in changeset.owner().listeners().finally() {
                if let Err(err) = listener.on_finally(&changeset) {
                    warn!(
                        target: "typegraph::txn",
                        txn_id = transaction.id(),
                        uid = %changeset.owner().uid(),
                        error = %err,
                        "Finally listener failed"
                    );
                }
            }
        }
        let leaked = manager.unwind_above(committed.frame());
        let exited = committed.exit();

        transaction.set_status(TransactionStatus::Committed);
        let balanced = manager.pop_committing(&transaction);
        debug!(
            target: "typegraph::txn",
            txn_id = transaction.id(),
            version = ?context.commit_version,
            "Transaction committed"
        );
        if leaked > 0 {
            error!(target: "typegraph::txn", txn_id = transaction.id(), leaked, "Finally listeners left scopes open");
            return Err(Error::invalid_operation(format!(
                "finally listeners of transaction {} left {} scopes open",
                transaction.id(),
                leaked
            )));
        }
        exited.and(balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::manager::TransactionManager;
    use crate::state::{ContainerKind, Member};
    use std::sync::{Arc, Mutex};
    use typegraph_core::{Error, ValidationError};

    #[test]
    fn test_pipeline_order() {
        let names: Vec<&str> = commit_pipeline().iter().map(|phase| phase.name()).collect();
        assert_eq!(names, vec!["init", "will", "do", "finally"]);
    }

    #[test]
    fn test_init_listener_can_add_changes() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        container.on_init(|changeset| {
            let height = changeset.projected(|state| {
                state
                    .as_complex()
                    .and_then(|props| props.get("height"))
                    .and_then(|m| m.as_value())
                    .and_then(|v| v.as_int())
            });
            if let Some(height) = height {
                changeset
                    .set("area", height * 2)
                    .map_err(|e| Rejection::vetoed(e.to_string()))?;
            }
            Ok(())
        });

        container
            .mutate(|changeset| changeset.set("height", 4).map(|_| ()))
            .unwrap();

        container.read_committed(|state| {
            assert_eq!(
                state.as_complex().unwrap().get("area"),
                Some(&Member::from(8i64))
            );
        });
    }

    #[test]
    fn test_restless_init_listener_is_unsettled() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let counter = Arc::new(Mutex::new(0i64));
        // Each listener's change invalidates the other one
        for property in ["a", "b"] {
            let tick = counter.clone();
            container.on_init(move |changeset| {
                let n = {
                    let mut n = tick.lock().unwrap();
                    *n += 1;
                    *n
                };
                changeset
                    .set(property, n)
                    .map_err(|e| Rejection::vetoed(e.to_string()))?;
                Ok(())
            });
        }

        let err = container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(Rejection::Unsettled { .. })));
        assert_eq!(container.version(), 1);
    }

    #[test]
    fn test_validator_rejects() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        container.add_validator(|container, state| {
            match state.as_complex().and_then(|props| props.get("height")) {
                Some(Member::Value(v)) if v.as_int().unwrap_or(0) < 0 => {
                    vec![ValidationError::for_property(container.uid(), "height", "must not be negative")]
                }
                _ => Vec::new(),
            }
        });

        let err = container
            .mutate(|changeset| changeset.set("height", -1).map(|_| ()))
            .unwrap_err();
        match err {
            Error::Rejected(Rejection::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].property.as_deref(), Some("height"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        container.read_committed(|state| assert!(state.as_complex().unwrap().is_empty()));
    }

    #[test]
    fn test_will_listener_sees_read_only_changeset() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let saw_read_only = Arc::new(Mutex::new(None));
        let seen = saw_read_only.clone();
        container.on_will(move |changeset| {
            let attempt = changeset.set("late", 1);
            *seen.lock().unwrap() = Some((changeset.is_read_only(), attempt.is_err()));
            Ok(())
        });

        container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap();
        assert_eq!(*saw_read_only.lock().unwrap(), Some((true, true)));
    }

    #[test]
    fn test_finally_listener_runs_outside_transaction() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let observed = Arc::new(Mutex::new(None));
        let seen = observed.clone();
        let inner_manager = manager.clone();
        container.on_finally(move |changeset| {
            let ambient = inner_manager.ambient().is_some();
            let version = changeset.owner().version();
            *seen.lock().unwrap() = Some((ambient, version));
            Ok(())
        });

        container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap();
        assert_eq!(
            *observed.lock().unwrap(),
            Some((false, container.version()))
        );
    }

    #[test]
    fn test_failing_finally_listener_does_not_undo_commit() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        container.on_finally(|_| Err(Error::invalid_operation("listener bug")));

        container
            .mutate(|changeset| changeset.set("height", 1).map(|_| ()))
            .unwrap();
        assert!(container.version() > 1);
    }
}
