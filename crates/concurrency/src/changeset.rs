//! Changesets
//!
//! A changeset holds the pending primitive changes for exactly one
//! container (its *owner*) within one transaction, together with the
//! projected state those changes produce. It also records:
//!
//! - the owner's committed version when the changeset was created, used to
//!   detect concurrent commits when a set-aside transaction is re-entered
//! - its net order, the depth below the top-most referrer, used to run
//!   init listeners on referenced containers before their referrers
//! - the transaction version of its latest change (own or descendant), used
//!   to skip init listeners that already saw the current state
//!
//! Every mutator fails with `InvalidOperation` once the changeset is
//! read-only. The read-only flag is set when the transaction enters its
//! will phase or is rejected, and is never cleared.

use crate::change::{PrimitiveChange, RecordedChange};
use crate::container::Container;
use crate::listener::ListenerId;
use crate::state::{ContainerState, Member, Slot};
use crate::transaction::{Transaction, TransactionInner};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;
use typegraph_core::{Error, Result, Uid};

struct ChangesetInner {
    transaction: Weak<TransactionInner>,
    owner: Container,
    owner_version_at_start: u64,
    ordinal: usize,
    data: Mutex<ChangesetData>,
}

struct ChangesetData {
    read_only: bool,
    net_order: u32,
    transaction_version: u64,
    changes: Vec<RecordedChange>,
    projected: ContainerState,
    children: Vec<(Slot, Uid)>,
    parents: Vec<(Slot, Uid)>,
    listener_runs: FxHashMap<ListenerId, u64>,
}

/// Pending changes for one container in one transaction
///
/// Cloning the handle does not clone the changeset. Equality is identity.
#[derive(Clone)]
pub struct Changeset {
    inner: Arc<ChangesetInner>,
}

impl Changeset {
    pub(crate) fn new(transaction: Weak<TransactionInner>, owner: &Container, ordinal: usize) -> Self {
        Changeset {
            inner: Arc::new(ChangesetInner {
                transaction,
                owner: owner.clone(),
                owner_version_at_start: owner.version(),
                ordinal,
                data: Mutex::new(ChangesetData {
                    read_only: false,
                    net_order: 0,
                    transaction_version: 0,
                    changes: Vec::new(),
                    projected: owner.committed_state(),
                    children: Vec::new(),
                    parents: Vec::new(),
                    listener_runs: FxHashMap::default(),
                }),
            }),
        }
    }

    // === Accessors ===

    /// Container this changeset describes
    pub fn owner(&self) -> &Container {
        &self.inner.owner
    }

    /// Owning transaction
    ///
    /// # Errors
    /// Returns `TransactionDropped` if the transaction no longer exists.
    pub fn transaction(&self) -> Result<Transaction> {
        self.inner
            .transaction
            .upgrade()
            .map(Transaction::from_inner)
            .ok_or(Error::TransactionDropped)
    }

    /// Owner's committed version when this changeset was created
    pub fn owner_version_at_start(&self) -> u64 {
        self.inner.owner_version_at_start
    }

    /// Position in the transaction's creation order
    pub fn ordinal(&self) -> usize {
        self.inner.ordinal
    }

    /// Whether mutators are locked out
    pub fn is_read_only(&self) -> bool {
        self.inner.data.lock().read_only
    }

    /// Current net order
    pub fn net_order(&self) -> u32 {
        self.inner.data.lock().net_order
    }

    /// Transaction version of the latest change to this changeset or a descendant
    pub fn transaction_version(&self) -> u64 {
        self.inner.data.lock().transaction_version
    }

    /// Recorded changes, in recording order
    pub fn changes(&self) -> Vec<RecordedChange> {
        self.inner.data.lock().changes.clone()
    }

    /// Whether any change has been recorded
    pub fn has_changes(&self) -> bool {
        !self.inner.data.lock().changes.is_empty()
    }

    /// Number of recorded changes
    pub fn change_count(&self) -> usize {
        self.inner.data.lock().changes.len()
    }

    /// Read the projected state
    ///
    /// `f` sees a snapshot, so it may freely read or mutate other containers.
    pub fn projected<R>(&self, f: impl FnOnce(&ContainerState) -> R) -> R {
        let state = self.projected_state();
        f(&state)
    }

    /// Clone of the projected state
    pub fn projected_state(&self) -> ContainerState {
        self.inner.data.lock().projected.clone()
    }

    /// Changesets of containers this owner references, with the slot
    pub fn children(&self) -> Vec<(Slot, Changeset)> {
        let links = self.inner.data.lock().children.clone();
        self.resolve(links)
    }

    /// Changesets of containers referencing this owner, with the slot
    pub fn parents(&self) -> Vec<(Slot, Changeset)> {
        let links = self.inner.data.lock().parents.clone();
        self.resolve(links)
    }

    fn resolve(&self, links: Vec<(Slot, Uid)>) -> Vec<(Slot, Changeset)> {
        let Ok(transaction) = self.transaction() else {
            return Vec::new();
        };
        links
            .into_iter()
            .filter_map(|(slot, uid)| transaction.get_changeset(uid).map(|cs| (slot, cs)))
            .collect()
    }

    // === Operations ===

    /// Raise the net order to `order`
    ///
    /// Returns whether the net order changed; it never decreases.
    pub fn update_net_order(&self, order: u32) -> bool {
        let mut data = self.inner.data.lock();
        if order <= data.net_order {
            return false;
        }
        trace!(
            target: "typegraph::changeset",
            uid = %self.inner.owner.uid(),
            from = data.net_order,
            to = order,
            "Net order raised"
        );
        data.net_order = order;
        true
    }

    /// Drop every recorded change
    ///
    /// The projected state returns to the committed state and the reference
    /// edges added or removed by the dropped changes are undone.
    ///
    /// # Errors
    /// Returns `InvalidOperation` if the changeset is read-only.
    pub fn clear_changes(&self) -> Result<()> {
        let transaction = self.transaction()?;
        let changes = {
            let mut data = self.inner.data.lock();
            if data.read_only {
                return Err(self.read_only_error());
            }
            if data.changes.is_empty() {
                return Ok(());
            }
            data.projected = self.inner.owner.committed_state();
            std::mem::take(&mut data.changes)
        };
        for recorded in changes.iter().rev() {
            transaction.project_delta(&self.inner.owner, recorded.change.reference_delta(), false);
        }
        transaction.next_change_version(self);
        Ok(())
    }

    /// Record a change built from the projected state
    ///
    /// `build` returns `None` when the requested mutation would change
    /// nothing; no change is recorded then and `Ok(false)` is returned.
    pub(crate) fn record(
        &self,
        build: impl FnOnce(&ContainerState) -> Result<Option<PrimitiveChange>>,
    ) -> Result<bool> {
        let transaction = self.transaction()?;
        let change = {
            let mut data = self.inner.data.lock();
            if data.read_only {
                return Err(self.read_only_error());
            }
            let Some(change) = build(&data.projected)? else {
                return Ok(false);
            };
            data.projected.apply(&change)?;
            change
        };

        let delta = change.reference_delta();
        let version = transaction.next_change_version(self);
        trace!(
            target: "typegraph::changeset",
            txn_id = transaction.id(),
            uid = %self.inner.owner.uid(),
            kind = %change.kind(),
            version,
            "Change recorded"
        );
        self.inner
            .data
            .lock()
            .changes
            .push(RecordedChange { change, version });
        if !delta.is_empty() {
            transaction.project_delta(&self.inner.owner, delta, true);
        }
        Ok(true)
    }

    /// Set a property of a complex container
    ///
    /// Returns whether a change was recorded; setting the current value is a
    /// no-op.
    pub fn set(&self, property: &str, member: impl Into<Member>) -> Result<bool> {
        if property.is_empty() {
            return Err(Error::ArgumentRequired("property".to_string()));
        }
        let member = member.into();
        self.record(|state| {
            let props = expect_complex(state, "set")?;
            let old = props.get(property).cloned();
            if old.as_ref() == Some(&member) {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Replace {
                property: property.to_string(),
                old,
                new: Some(member),
            }))
        })
    }

    /// Remove a property of a complex container
    pub fn unset(&self, property: &str) -> Result<bool> {
        self.record(|state| {
            let props = expect_complex(state, "unset")?;
            Ok(props.get(property).cloned().map(|old| PrimitiveChange::Replace {
                property: property.to_string(),
                old: Some(old),
                new: None,
            }))
        })
    }

    /// Insert members into a list at `index`
    pub fn insert(&self, index: usize, members: Vec<Member>) -> Result<bool> {
        self.record(|state| {
            let items = expect_list(state, "insert")?;
            if index > items.len() {
                return Err(index_error("insert", index, items.len()));
            }
            if members.is_empty() {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Add { index, members }))
        })
    }

    /// Remove `count` members of a list starting at `index`
    pub fn remove(&self, index: usize, count: usize) -> Result<bool> {
        self.record(|state| {
            let items = expect_list(state, "remove")?;
            let end = index.saturating_add(count);
            if end > items.len() {
                return Err(index_error("remove", end, items.len()));
            }
            if count == 0 {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Remove {
                index,
                members: items[index..end].to_vec(),
            }))
        })
    }

    /// Move one list member from `from` to `to`
    pub fn move_item(&self, from: usize, to: usize) -> Result<bool> {
        self.record(|state| {
            let items = expect_list(state, "move")?;
            if from >= items.len() || to >= items.len() {
                return Err(index_error("move", from.max(to), items.len()));
            }
            if from == to {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Move { from, to }))
        })
    }

    /// Stable-sort list members with `compare`
    pub fn sort_by<F>(&self, mut compare: F) -> Result<bool>
    where
        F: FnMut(&Member, &Member) -> Ordering,
    {
        self.record(|state| {
            let items = expect_list(state, "sort")?;
            let mut permutation: Vec<usize> = (0..items.len()).collect();
            permutation.sort_by(|&a, &b| compare(&items[a], &items[b]));
            if permutation.iter().enumerate().all(|(i, &p)| i == p) {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Sort { permutation }))
        })
    }

    /// Remove every list member
    pub fn clear(&self) -> Result<bool> {
        self.record(|state| {
            let items = expect_list(state, "clear")?;
            if items.is_empty() {
                return Ok(None);
            }
            Ok(Some(PrimitiveChange::Clear {
                members: items.to_vec(),
            }))
        })
    }

    // === Commit support ===

    /// Replay the recorded changes, in order, onto the owner's committed state
    pub(crate) fn replay(&self) -> Result<ContainerState> {
        let mut state = self.inner.owner.committed_state();
        let data = self.inner.data.lock();
        for recorded in &data.changes {
            state.apply(&recorded.change)?;
        }
        Ok(state)
    }

    /// Install a replayed state on the owner and stamp its version
    pub(crate) fn apply_to(&self, state: ContainerState, version: u64) {
        self.inner.owner.install(state, version);
    }

    pub(crate) fn mark_read_only(&self) {
        self.inner.data.lock().read_only = true;
    }

    pub(crate) fn set_transaction_version(&self, version: u64) {
        let mut data = self.inner.data.lock();
        if version > data.transaction_version {
            data.transaction_version = version;
        }
    }

    pub(crate) fn add_child(&self, slot: Slot, uid: Uid) {
        self.inner.data.lock().children.push((slot, uid));
    }

    pub(crate) fn remove_child(&self, slot: &Slot, uid: Uid) {
        remove_link(&mut self.inner.data.lock().children, slot, uid);
    }

    pub(crate) fn add_parent(&self, slot: Slot, uid: Uid) {
        self.inner.data.lock().parents.push((slot, uid));
    }

    pub(crate) fn remove_parent(&self, slot: &Slot, uid: Uid) {
        remove_link(&mut self.inner.data.lock().parents, slot, uid);
    }

    /// Transaction version at which an init listener last finished
    pub(crate) fn listener_run(&self, id: ListenerId) -> Option<u64> {
        self.inner.data.lock().listener_runs.get(&id).copied()
    }

    pub(crate) fn mark_listener_run(&self, id: ListenerId, version: u64) {
        self.inner.data.lock().listener_runs.insert(id, version);
    }

    fn read_only_error(&self) -> Error {
        Error::invalid_operation(format!(
            "changeset for container {} is read-only",
            self.inner.owner.uid()
        ))
    }
}

fn remove_link(links: &mut Vec<(Slot, Uid)>, slot: &Slot, uid: Uid) {
    if let Some(position) = links.iter().position(|(s, u)| s == slot && *u == uid) {
        links.remove(position);
    }
}

fn expect_complex<'a>(state: &'a ContainerState, op: &str) -> Result<&'a BTreeMap<String, Member>> {
    state.as_complex().ok_or_else(|| {
        Error::invalid_operation(format!("{} requires a complex container, found {}", op, state.kind()))
    })
}

fn expect_list<'a>(state: &'a ContainerState, op: &str) -> Result<&'a [Member]> {
    state.as_list().ok_or_else(|| {
        Error::invalid_operation(format!("{} requires a list container, found {}", op, state.kind()))
    })
}

fn index_error(op: &str, index: usize, len: usize) -> Error {
    Error::invalid_operation(format!(
        "{} at index {} is out of range for a list of length {}",
        op, index, len
    ))
}

impl PartialEq for Changeset {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Changeset {}

impl fmt::Debug for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Changeset")
            .field("owner", &self.inner.owner.uid())
            .field("ordinal", &self.inner.ordinal)
            .field("net_order", &data.net_order)
            .field("read_only", &data.read_only)
            .field("changes", &data.changes.len())
            .finish()
    }
}
