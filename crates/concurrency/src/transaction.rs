//! Transactions
//!
//! A transaction owns every changeset and change-ref created while it is
//! active. It is driven through its life by scopes:
//!
//! - Entering the root scope of a transaction that already holds
//!   changesets (it was set aside earlier) re-checks every changeset's
//!   baseline version and rejects the transaction on conflict.
//! - Accepting the root scope runs the commit phases in order
//!   (init, will, do, finally).
//! - Rejection is terminal. A rejected transaction applies nothing, its
//!   changesets become read-only and every further scope entry fails.
//!
//! ## Reference propagation
//!
//! Creating a changeset for a container also creates changesets for every
//! container referencing it (as projected in this transaction), linking
//! each child changeset under its parent. Net order grows along those
//! links, so a referenced container always orders above its referrers.

use crate::change::ReferenceDelta;
use crate::change_ref::ChangeRef;
use crate::changeset::Changeset;
use crate::container::{AmbientRef, Container};
use crate::manager::TransactionManager;
use crate::phase::{commit_pipeline, CommitContext};
use crate::scope::TransactionScope;
use crate::state::Slot;
use crate::validation::validate_baselines;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};
use typegraph_core::{Error, Rejection, Result, Uid};

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Init` → `Will` (commit begins validation)
/// - `Will` → `Do` → `Finally` → `Committed`
/// - `Init` | `Will` → `Rejected`
///
/// Only `Init` accepts changes.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStatus {
    /// Accepting changes
    Init,
    /// Validating; changesets are read-only
    Will,
    /// Applying changes to containers
    Do,
    /// Running finally listeners
    Finally,
    /// Committed successfully
    Committed,
    /// Rejected; nothing was applied
    Rejected(Rejection),
}

impl TransactionStatus {
    /// Whether the transaction reached a terminal state
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::Rejected(_)
        )
    }

    /// Changes have not been applied yet, so a failure can still reject
    fn before_apply(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Init | TransactionStatus::Will | TransactionStatus::Rejected(_)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Init => write!(f, "init"),
            TransactionStatus::Will => write!(f, "will"),
            TransactionStatus::Do => write!(f, "do"),
            TransactionStatus::Finally => write!(f, "finally"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::Rejected(_) => write!(f, "rejected"),
        }
    }
}

/// Summary of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Committed transaction
    pub transaction_id: u64,
    /// Global version stamped on every touched container, if anything changed
    pub version: Option<u64>,
    /// Number of changesets, including those created by propagation
    pub changesets: usize,
    /// Number of primitive changes recorded
    pub changes: u64,
}

struct TxState {
    status: TransactionStatus,
    /// Local change counter
    version: u64,
    scope_count: usize,
    changesets: FxHashMap<Uid, Changeset>,
    order: Vec<Changeset>,
    change_refs: FxHashMap<Uid, ChangeRef>,
    ref_order: Vec<Uid>,
    /// Changesets changed since the last `take_touched`
    touched: Vec<Uid>,
}

pub(crate) struct TransactionInner {
    id: u64,
    manager: TransactionManager,
    state: Mutex<TxState>,
}

/// Handle to a transaction
///
/// Cloning the handle does not clone the transaction. Equality is identity.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(manager: &TransactionManager, id: u64) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                id,
                manager: manager.clone(),
                state: Mutex::new(TxState {
                    status: TransactionStatus::Init,
                    version: 0,
                    scope_count: 0,
                    changesets: FxHashMap::default(),
                    order: Vec::new(),
                    change_refs: FxHashMap::default(),
                    ref_order: Vec::new(),
                    touched: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Transaction { inner }
    }

    // === Accessors ===

    /// Unique transaction id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Manager this transaction belongs to
    pub fn manager(&self) -> &TransactionManager {
        &self.inner.manager
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status.clone()
    }

    /// Number of primitive changes recorded so far
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of currently entered scopes
    pub fn scope_count(&self) -> usize {
        self.inner.state.lock().scope_count
    }

    /// Whether changes are locked out (any status but `Init`)
    pub fn is_read_only(&self) -> bool {
        self.inner.state.lock().status != TransactionStatus::Init
    }

    /// Whether the transaction committed or was rejected
    pub fn is_settled(&self) -> bool {
        self.inner.state.lock().status.is_settled()
    }

    /// Whether the transaction was rejected
    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.state.lock().status, TransactionStatus::Rejected(_))
    }

    /// Changeset for a container, if one exists
    pub fn get_changeset(&self, uid: Uid) -> Option<Changeset> {
        self.inner.state.lock().changesets.get(&uid).cloned()
    }

    /// All changesets, in creation order
    pub fn changesets(&self) -> Vec<Changeset> {
        self.inner.state.lock().order.clone()
    }

    /// Number of changesets
    pub fn changeset_count(&self) -> usize {
        self.inner.state.lock().order.len()
    }

    /// All change-refs, in creation order
    pub fn change_refs(&self) -> Vec<ChangeRef> {
        let state = self.inner.state.lock();
        state
            .ref_order
            .iter()
            .filter_map(|uid| state.change_refs.get(uid).cloned())
            .collect()
    }

    /// Incoming references of `container` as projected by this transaction
    pub fn ambient_references(&self, container: &Container) -> Vec<AmbientRef> {
        let stored = container.stored_references();
        let state = self.inner.state.lock();
        match state.change_refs.get(&container.uid()) {
            Some(change_ref) => change_ref.project(stored),
            None => stored,
        }
    }

    // === Changes ===

    /// Get or create the changeset for `container`
    ///
    /// Creating a changeset also ensures changesets for every container
    /// that references it, transitively. Each container gets at most one
    /// changeset per transaction, so cycles terminate.
    ///
    /// # Errors
    /// Returns `InvalidOperation` if the transaction is read-only, or the
    /// rejection if it was rejected.
    pub fn ensure_changeset(&self, container: &Container) -> Result<Changeset> {
        let uid = container.uid();
        let changeset = {
            let mut state = self.inner.state.lock();
            match &state.status {
                TransactionStatus::Init => {}
                TransactionStatus::Rejected(rejection) => {
                    return Err(Error::Rejected(rejection.clone()))
                }
                status => {
                    return Err(Error::invalid_operation(format!(
                        "transaction {} is read-only ({})",
                        self.id(),
                        status
                    )))
                }
            }
            if let Some(existing) = state.changesets.get(&uid) {
                return Ok(existing.clone());
            }
            let changeset = Changeset::new(Arc::downgrade(&self.inner), container, state.order.len());
            state.changesets.insert(uid, changeset.clone());
            state.order.push(changeset.clone());
            changeset
        };
        debug!(
            target: "typegraph::changeset",
            txn_id = self.id(),
            uid = %uid,
            kind = %container.kind(),
            ordinal = changeset.ordinal(),
            "Changeset created"
        );

        for reference in self.ambient_references(container) {
            let Some(parent) = reference.parent() else {
                continue;
            };
            let parent_changeset = self.ensure_changeset(&parent)?;
            self.link(&parent_changeset, reference.slot().clone(), &changeset);
        }
        Ok(changeset)
    }

    /// Allocate the next local version for a change to `changeset`
    ///
    /// The version is stamped on the changeset and on every ancestor.
    pub(crate) fn next_change_version(&self, changeset: &Changeset) -> u64 {
        let version = {
            let mut state = self.inner.state.lock();
            state.version += 1;
            state.touched.push(changeset.owner().uid());
            state.version
        };

        let mut visited = FxHashSet::default();
        let mut stack = vec![changeset.clone()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.owner().uid()) {
                continue;
            }
            current.set_transaction_version(version);
            stack.extend(current.parents().into_iter().map(|(_, parent)| parent));
        }
        version
    }

    /// Project the reference edges gained and lost by a change of `owner`
    ///
    /// With `forward == false` the delta is undone instead.
    pub(crate) fn project_delta(&self, owner: &Container, delta: ReferenceDelta, forward: bool) {
        let (gained, lost) = if forward {
            (delta.added, delta.removed)
        } else {
            (delta.removed, delta.added)
        };
        for (slot, child) in lost {
            self.project_reference(owner, slot, &child, -1);
        }
        for (slot, child) in gained {
            self.project_reference(owner, slot, &child, 1);
        }
    }

    fn project_reference(&self, parent: &Container, slot: Slot, child: &Container, delta: i64) {
        let child_uid = child.uid();
        {
            let mut state = self.inner.state.lock();
            if !state.change_refs.contains_key(&child_uid) {
                state.ref_order.push(child_uid);
            }
            state
                .change_refs
                .entry(child_uid)
                .or_insert_with(|| ChangeRef::new(child.clone()))
                .edit(AmbientRef::new(parent, slot.clone()), delta);
        }
        trace!(
            target: "typegraph::changeset",
            txn_id = self.id(),
            parent = %parent.uid(),
            child = %child_uid,
            slot = %slot,
            delta,
            "Reference projected"
        );

        let (Some(parent_changeset), Some(child_changeset)) =
            (self.get_changeset(parent.uid()), self.get_changeset(child_uid))
        else {
            return;
        };
        if delta > 0 {
            self.link(&parent_changeset, slot, &child_changeset);
        } else {
            parent_changeset.remove_child(&slot, child_uid);
            child_changeset.remove_parent(&slot, parent.uid());
        }
    }

    fn link(&self, parent: &Changeset, slot: Slot, child: &Changeset) {
        parent.add_child(slot.clone(), child.owner().uid());
        child.add_parent(slot, parent.owner().uid());
        let mut path = FxHashSet::default();
        self.propagate_net_order(child, parent.net_order().saturating_add(1), &mut path);
    }

    /// Raise net order along child links
    ///
    /// `path` holds the changesets on the current walk; reaching one of them
    /// again means a cycle, where net order is only a lower bound.
    fn propagate_net_order(&self, changeset: &Changeset, order: u32, path: &mut FxHashSet<Uid>) {
        let order = order.min(self.inner.manager.config().max_net_order);
        let uid = changeset.owner().uid();
        if path.contains(&uid) || !changeset.update_net_order(order) {
            return;
        }
        path.insert(uid);
        for (_, child) in changeset.children() {
            self.propagate_net_order(&child, order.saturating_add(1), path);
        }
        path.remove(&uid);
    }

    pub(crate) fn take_touched(&self) -> Vec<Uid> {
        std::mem::take(&mut self.inner.state.lock().touched)
    }

    // === Scopes and settlement ===

    /// Enter a scope of this transaction, making it ambient
    ///
    /// # Errors
    /// Returns the rejection if the transaction was (or on re-entry becomes)
    /// rejected, or `InvalidOperation` if it is already committing.
    pub fn enter(&self) -> Result<TransactionScope> {
        self.inner.manager.enter_transaction(self)
    }

    /// Count a scope entry; returns whether it is the root scope
    pub(crate) fn scope_enter(&self) -> Result<bool> {
        let mut state = self.inner.state.lock();
        match &state.status {
            TransactionStatus::Init | TransactionStatus::Will => {}
            TransactionStatus::Rejected(rejection) => return Err(Error::Rejected(rejection.clone())),
            status => {
                return Err(Error::invalid_operation(format!(
                    "cannot enter transaction {}: it is {}",
                    self.id(),
                    status
                )))
            }
        }

        if state.scope_count == 0 && !state.order.is_empty() {
            let validation = validate_baselines(&state.order);
            if !validation.is_valid() {
                let conflicts = validation.conflict_count();
                if let Some(rejection) = validation.into_rejection() {
                    debug!(
                        target: "typegraph::txn",
                        txn_id = self.id(),
                        conflicts,
                        reason = %rejection,
                        "Transaction rejected on re-entry"
                    );
                    Self::reject_locked(&mut state, rejection.clone());
                    return Err(Error::Rejected(rejection));
                }
            }
        }

        state.scope_count += 1;
        Ok(state.scope_count == 1)
    }

    pub(crate) fn scope_exit(&self) {
        let mut state = self.inner.state.lock();
        state.scope_count = state.scope_count.saturating_sub(1);
    }

    /// Veto the transaction
    ///
    /// Allowed until changes are applied. Rejecting an already rejected
    /// transaction does nothing.
    ///
    /// # Errors
    /// Returns `InvalidOperation` once the transaction is applying or committed.
    pub fn reject(&self, reason: impl Into<String>) -> Result<()> {
        let mut state = self.inner.state.lock();
        match &state.status {
            TransactionStatus::Init | TransactionStatus::Will => {
                let rejection = Rejection::vetoed(reason);
                debug!(target: "typegraph::txn", txn_id = self.id(), reason = %rejection, "Transaction vetoed");
                Self::reject_locked(&mut state, rejection);
                Ok(())
            }
            TransactionStatus::Rejected(_) => Ok(()),
            status => Err(Error::invalid_operation(format!(
                "cannot reject transaction {}: it is {}",
                self.id(),
                status
            ))),
        }
    }

    /// Reject with a specific reason unless changes were already applied
    pub(crate) fn mark_rejected(&self, rejection: Rejection) {
        let mut state = self.inner.state.lock();
        if matches!(state.status, TransactionStatus::Init | TransactionStatus::Will) {
            Self::reject_locked(&mut state, rejection);
        }
    }

    fn reject_locked(state: &mut TxState, rejection: Rejection) {
        state.status = TransactionStatus::Rejected(rejection);
        for changeset in &state.order {
            changeset.mark_read_only();
        }
    }

    pub(crate) fn set_status(&self, status: TransactionStatus) {
        self.inner.state.lock().status = status;
    }

    pub(crate) fn mark_all_read_only(&self) {
        for changeset in &self.inner.state.lock().order {
            changeset.mark_read_only();
        }
    }

    /// Run the commit phases
    ///
    /// Requires status `Init` and exactly one open scope, which is `scope`.
    /// On rejection the scope is closed and the rejection returned.
    pub(crate) fn commit(&self, scope: &mut TransactionScope) -> Result<CommitInfo> {
        {
            let state = self.inner.state.lock();
            match &state.status {
                TransactionStatus::Init => {}
                TransactionStatus::Rejected(rejection) => return Err(Error::Rejected(rejection.clone())),
                status => {
                    return Err(Error::invalid_operation(format!(
                        "transaction {} is already {}",
                        self.id(),
                        status
                    )))
                }
            }
            if state.scope_count != 1 {
                return Err(Error::invalid_operation(format!(
                    "cannot commit transaction {} with {} open scopes",
                    self.id(),
                    state.scope_count
                )));
            }
        }

        debug!(
            target: "typegraph::txn",
            txn_id = self.id(),
            changesets = self.changeset_count(),
            changes = self.version(),
            "Commit started"
        );

        let mut context = CommitContext::new(self.clone(), scope);
        for phase in commit_pipeline() {
            trace!(target: "typegraph::txn", txn_id = self.id(), phase = phase.name(), "Running commit phase");
            if let Err(err) = phase.run(&mut context) {
                if !self.status().before_apply() {
                    return Err(err);
                }
                let rejection = match err {
                    Error::Rejected(rejection) => rejection,
                    other => Rejection::vetoed(other.to_string()),
                };
                self.mark_rejected(rejection);
            }
            if let TransactionStatus::Rejected(rejection) = self.status() {
                debug!(
                    target: "typegraph::txn",
                    txn_id = self.id(),
                    phase = phase.name(),
                    reason = %rejection,
                    "Transaction rejected"
                );
                if let Err(err) = context.scope.close() {
                    error!(target: "typegraph::txn", txn_id = self.id(), error = %err, "Failed to close rejected scope");
                }
                return Err(Error::Rejected(rejection));
            }
        }

        Ok(context.into_info())
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("version", &state.version)
            .field("scope_count", &state.scope_count)
            .field("changesets", &state.order.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ContainerKind, ContainerState, Member};
    use std::collections::BTreeMap;

    fn complex_with(manager: &TransactionManager, name: &str, child: &Container) -> Container {
        let mut props = BTreeMap::new();
        props.insert(name.to_string(), Member::from(child));
        Container::new(manager, ContainerState::Complex(props))
    }

    // ========================================
    // Changeset creation
    // ========================================

    #[test]
    fn test_ensure_changeset_is_idempotent() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let tx = manager.begin();

        let first = tx.ensure_changeset(&container).unwrap();
        let second = tx.ensure_changeset(&container).unwrap();
        assert_eq!(first, second);
        assert_eq!(tx.changeset_count(), 1);
        assert_eq!(tx.get_changeset(container.uid()), Some(first));
    }

    #[test]
    fn test_ensure_changeset_creates_referrer_changesets() {
        let manager = TransactionManager::new();
        let c = Container::empty(&manager, ContainerKind::List);
        let b = complex_with(&manager, "items", &c);
        let a = complex_with(&manager, "child", &b);
        let tx = manager.begin();

        let cs_c = tx.ensure_changeset(&c).unwrap();
        let cs_b = tx.get_changeset(b.uid()).unwrap();
        let cs_a = tx.get_changeset(a.uid()).unwrap();

        assert_eq!(cs_a.net_order(), 0);
        assert_eq!(cs_b.net_order(), 1);
        assert_eq!(cs_c.net_order(), 2);

        let children: Vec<Uid> = cs_b.children().iter().map(|(_, cs)| cs.owner().uid()).collect();
        assert_eq!(children, vec![c.uid()]);
        let parents: Vec<Uid> = cs_b.parents().iter().map(|(_, cs)| cs.owner().uid()).collect();
        assert_eq!(parents, vec![a.uid()]);
    }

    #[test]
    fn test_cycles_terminate() {
        let manager = TransactionManager::new();
        let a = Container::empty(&manager, ContainerKind::Complex);
        let b = complex_with(&manager, "peer", &a);
        let tx = manager.begin();
        tx.ensure_changeset(&a).unwrap().set("peer", &b).unwrap();

        // a <-> b now reference each other; touching either must terminate
        let cs_b = tx.ensure_changeset(&b).unwrap();
        cs_b.set("height", 1).unwrap();
        assert_eq!(tx.changeset_count(), 2);
        assert!(cs_b.net_order() <= manager.config().max_net_order);
    }

    #[test]
    fn test_projected_reference_links_changesets() {
        let manager = TransactionManager::new();
        let parent = Container::empty(&manager, ContainerKind::Complex);
        let child = Container::empty(&manager, ContainerKind::Complex);
        let tx = manager.begin();

        tx.ensure_changeset(&parent).unwrap().set("child", &child).unwrap();
        assert!(child.stored_references().is_empty());
        assert_eq!(tx.ambient_references(&child).len(), 1);

        // A changeset created afterwards sees the projected referrer
        let cs_child = tx.ensure_changeset(&child).unwrap();
        assert_eq!(cs_child.net_order(), 1);
        assert_eq!(cs_child.parents().len(), 1);
    }

    #[test]
    fn test_change_version_propagates_to_ancestors() {
        let manager = TransactionManager::new();
        let child = Container::empty(&manager, ContainerKind::Complex);
        let parent = complex_with(&manager, "child", &child);
        let tx = manager.begin();

        let cs_child = tx.ensure_changeset(&child).unwrap();
        cs_child.set("height", 1).unwrap();

        let cs_parent = tx.get_changeset(parent.uid()).unwrap();
        assert_eq!(cs_parent.transaction_version(), 1);
        assert!(!cs_parent.has_changes());
    }

    // ========================================
    // Status and rejection
    // ========================================

    #[test]
    fn test_reject_makes_changesets_read_only() {
        let manager = TransactionManager::new();
        let container = Container::empty(&manager, ContainerKind::Complex);
        let tx = manager.begin();
        let changeset = tx.ensure_changeset(&container).unwrap();

        tx.reject("no").unwrap();
        assert!(tx.is_rejected());
        assert!(tx.is_settled());
        assert!(changeset.is_read_only());
        assert!(matches!(
            tx.ensure_changeset(&container),
            Err(Error::Rejected(Rejection::Vetoed(_)))
        ));
        assert!(tx.enter().is_err());
        // Rejecting twice is harmless
        tx.reject("again").unwrap();
        assert_eq!(tx.status(), TransactionStatus::Rejected(Rejection::vetoed("no")));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TransactionStatus::Init.to_string(), "init");
        assert_eq!(TransactionStatus::Committed.to_string(), "committed");
        assert_eq!(
            TransactionStatus::Rejected(Rejection::vetoed("x")).to_string(),
            "rejected"
        );
    }

    #[test]
    fn test_scope_count_tracks_nesting() {
        let manager = TransactionManager::new();
        let tx = manager.begin();

        let outer = tx.enter().unwrap();
        assert!(outer.is_root());
        let inner = tx.enter().unwrap();
        assert!(!inner.is_root());
        assert_eq!(tx.scope_count(), 2);

        inner.exit().unwrap();
        outer.exit().unwrap();
        assert_eq!(tx.scope_count(), 0);
        assert!(manager.ambient().is_none());
    }
}
