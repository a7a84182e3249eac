//! Containers
//!
//! A container is any value object that participates in transactions: it
//! has a stable [`Uid`], a version counter that only moves when a
//! transaction commits, and committed state. Containers also remember the
//! *ambient references* pointing at them (which container holds them, and
//! through which slot) so changes can propagate up the reference graph.
//!
//! # Reads
//!
//! [`Container::read`] sees the projected state when the ambient
//! transaction holds a changeset for the container, and the committed
//! state otherwise. [`Container::read_committed`] always sees the
//! committed state.
//!
//! # Writes
//!
//! [`Container::mutate`] runs a closure against the container's changeset
//! in the ambient transaction. Without an ambient transaction it opens an
//! implicit one and accepts it when the closure returns.

use crate::changeset::Changeset;
use crate::listener::{
    FinallyListener, InitListener, ListenerId, ListenerResult, Listeners, Validator, WillListener,
};
use crate::manager::TransactionManager;
use crate::pending::Pending;
use crate::state::{ContainerKind, ContainerState, Slot};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;
use typegraph_core::{Result, Uid, ValidationError};

/// Version every container starts at
pub const BASE_VERSION: u64 = 1;

pub(crate) struct ContainerInner {
    uid: Uid,
    kind: ContainerKind,
    version: AtomicU64,
    state: RwLock<ContainerState>,
    references: Mutex<Vec<AmbientRef>>,
    listeners: Listeners,
    manager: TransactionManager,
}

/// Shared handle to a container
///
/// Cloning the handle does not clone the container. Equality is identity.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create a container with the given initial state
    ///
    /// Containers referenced by the initial state record this container as
    /// a referrer immediately; construction is not transactional.
    pub fn new(manager: &TransactionManager, state: ContainerState) -> Self {
        let references = state.references();
        let container = Container {
            inner: Arc::new(ContainerInner {
                uid: Uid::next(),
                kind: state.kind(),
                version: AtomicU64::new(BASE_VERSION),
                state: RwLock::new(state),
                references: Mutex::new(Vec::new()),
                listeners: Listeners::default(),
                manager: manager.clone(),
            }),
        };
        for (slot, child) in references {
            child
                .inner
                .references
                .lock()
                .push(AmbientRef::new(&container, slot));
        }
        container
    }

    /// Create an empty container of the given kind
    pub fn empty(manager: &TransactionManager, kind: ContainerKind) -> Self {
        Self::new(manager, ContainerState::empty(kind))
    }

    /// Stable, process-unique identifier
    pub fn uid(&self) -> Uid {
        self.inner.uid
    }

    /// Committed version
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Container shape
    pub fn kind(&self) -> ContainerKind {
        self.inner.kind
    }

    /// Manager this container's transactions run under
    pub fn manager(&self) -> &TransactionManager {
        &self.inner.manager
    }

    /// Weak handle that does not keep the container alive
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer {
            uid: self.inner.uid,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Changeset for this container in the ambient transaction, if any
    pub fn current_changeset(&self) -> Option<Changeset> {
        self.inner
            .manager
            .ambient()
            .and_then(|tx| tx.get_changeset(self.uid()))
    }

    /// Read the state as seen by the ambient transaction
    pub fn read<R>(&self, f: impl FnOnce(&ContainerState) -> R) -> R {
        match self.current_changeset() {
            Some(changeset) => changeset.projected(f),
            None => f(&self.inner.state.read()),
        }
    }

    /// Read the committed state, ignoring any pending changes
    pub fn read_committed<R>(&self, f: impl FnOnce(&ContainerState) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Committed state plus the ambient transaction's overlay, if any
    pub fn pending(&self) -> Pending<ContainerState> {
        let committed = self.inner.state.read().clone();
        let overlay = self
            .current_changeset()
            .map(|changeset| changeset.projected(|state| state.clone()));
        Pending::new(committed, overlay)
    }

    /// Run `f` against this container's changeset
    ///
    /// Joins the ambient transaction when there is one. Otherwise an
    /// implicit transaction is opened and accepted after `f` succeeds, or
    /// rejected if `f` fails.
    ///
    /// # Errors
    /// Propagates errors from `f`, from creating the changeset (for example
    /// when the ambient transaction is already read-only), and from
    /// committing the implicit transaction.
    pub fn mutate<R>(&self, f: impl FnOnce(&Changeset) -> Result<R>) -> Result<R> {
        if let Some(tx) = self.inner.manager.ambient() {
            let changeset = tx.ensure_changeset(self)?;
            return f(&changeset);
        }

        let scope = self.inner.manager.enter()?;
        let outcome = scope
            .transaction()
            .ensure_changeset(self)
            .and_then(|changeset| f(&changeset));
        match outcome {
            Ok(value) if scope.transaction().version() == 0 => {
                // Nothing was recorded; leave the implicit transaction behind
                scope.exit()?;
                Ok(value)
            }
            Ok(value) => {
                scope.accept()?;
                Ok(value)
            }
            Err(err) => {
                let txn_id = scope.transaction().id();
                if let Err(close_err) = scope.reject(err.to_string()) {
                    error!(
                        target: "typegraph::txn",
                        txn_id,
                        error = %close_err,
                        "Failed to close rejected implicit transaction"
                    );
                }
                Err(err)
            }
        }
    }

    /// Incoming references as projected by the ambient transaction
    pub fn ambient_references(&self) -> Vec<AmbientRef> {
        match self.inner.manager.ambient() {
            Some(tx) => tx.ambient_references(self),
            None => self.stored_references(),
        }
    }

    /// Incoming references as committed
    pub fn stored_references(&self) -> Vec<AmbientRef> {
        self.inner.references.lock().clone()
    }

    // === Listener registration ===

    /// Register an init-phase listener
    pub fn on_init<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.listeners.add_init(Arc::new(listener))
    }

    /// Register an init-phase listener object
    pub fn add_init_listener(&self, listener: Arc<dyn InitListener>) -> ListenerId {
        self.inner.listeners.add_init(listener)
    }

    /// Register a will-phase listener
    pub fn on_will<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.listeners.add_will(Arc::new(listener))
    }

    /// Register a will-phase listener object
    pub fn add_will_listener(&self, listener: Arc<dyn WillListener>) -> ListenerId {
        self.inner.listeners.add_will(listener)
    }

    /// Register a finally-phase listener
    pub fn on_finally<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Changeset) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.listeners.add_finally(Arc::new(listener))
    }

    /// Register a finally-phase listener object
    pub fn add_finally_listener(&self, listener: Arc<dyn FinallyListener>) -> ListenerId {
        self.inner.listeners.add_finally(listener)
    }

    /// Register a validator
    pub fn add_validator<F>(&self, validator: F) -> ListenerId
    where
        F: Fn(&Container, &ContainerState) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.inner.listeners.add_validator(Arc::new(validator))
    }

    /// Register a validator object
    pub fn add_validator_object(&self, validator: Arc<dyn Validator>) -> ListenerId {
        self.inner.listeners.add_validator(validator)
    }

    /// Unregister a listener or validator
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    /// Run every validator against `state`
    pub fn validate(&self, state: &ContainerState) -> Vec<ValidationError> {
        self.inner
            .listeners
            .validators()
            .iter()
            .flat_map(|(_, validator)| validator.validate(self, state))
            .collect()
    }

    // === Commit support ===

    pub(crate) fn committed_state(&self) -> ContainerState {
        self.inner.state.read().clone()
    }

    /// Replace the committed state and stamp the version
    pub(crate) fn install(&self, state: ContainerState, version: u64) {
        *self.inner.state.write() = state;
        self.inner.version.store(version, Ordering::SeqCst);
    }

    pub(crate) fn with_references_mut<R>(&self, f: impl FnOnce(&mut Vec<AmbientRef>) -> R) -> R {
        f(&mut self.inner.references.lock())
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Container {}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("uid", &self.inner.uid)
            .field("kind", &self.inner.kind)
            .field("version", &self.version())
            .finish()
    }
}

/// Weak container handle
#[derive(Clone)]
pub struct WeakContainer {
    uid: Uid,
    inner: Weak<ContainerInner>,
}

impl WeakContainer {
    /// Identifier of the referenced container
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Upgrade to a strong handle, if the container is still alive
    pub fn upgrade(&self) -> Option<Container> {
        self.inner.upgrade().map(|inner| Container { inner })
    }
}

impl fmt::Debug for WeakContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakContainer({})", self.uid)
    }
}

/// An incoming reference: `parent` holds this container through `slot`
#[derive(Debug, Clone)]
pub struct AmbientRef {
    parent: WeakContainer,
    slot: Slot,
}

impl AmbientRef {
    /// Create a reference from `parent` through `slot`
    pub fn new(parent: &Container, slot: Slot) -> Self {
        Self {
            parent: parent.downgrade(),
            slot,
        }
    }

    /// Referencing container, if still alive
    pub fn parent(&self) -> Option<Container> {
        self.parent.upgrade()
    }

    /// Identifier of the referencing container
    pub fn parent_uid(&self) -> Uid {
        self.parent.uid()
    }

    /// Slot of the parent holding the reference
    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

impl PartialEq for AmbientRef {
    fn eq(&self, other: &Self) -> bool {
        self.parent.uid() == other.parent.uid() && self.slot == other.slot
    }
}

impl Eq for AmbientRef {}
