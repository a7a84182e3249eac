//! Change-phase listeners
//!
//! Containers opt into commit phases by registering listeners:
//!
//! - [`InitListener`]: runs in the init phase, leaves first. May read and
//!   mutate changesets (its own and others) or veto the transaction.
//! - [`Validator`]: runs at the start of the will phase against the
//!   projected state. Any reported error rejects the transaction.
//! - [`WillListener`]: runs in the will phase. Changesets are read-only;
//!   the listener may only observe or veto.
//! - [`FinallyListener`]: runs after the changes are applied, outside of
//!   any ambient transaction. Errors are logged and never undo the commit.

use crate::changeset::Changeset;
use crate::container::Container;
use crate::state::ContainerState;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use typegraph_core::{Rejection, Result, ValidationError};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of an init or will listener
pub type ListenerResult = std::result::Result<(), Rejection>;

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Init-phase listener
pub trait InitListener: Send + Sync {
    /// Called with the container's changeset while the transaction is still mutable
    fn on_init(&self, changeset: &Changeset) -> ListenerResult;
}

impl<F> InitListener for F
where
    F: Fn(&Changeset) -> ListenerResult + Send + Sync,
{
    fn on_init(&self, changeset: &Changeset) -> ListenerResult {
        self(changeset)
    }
}

/// Will-phase listener
pub trait WillListener: Send + Sync {
    /// Called with the container's read-only changeset
    fn on_will(&self, changeset: &Changeset) -> ListenerResult;
}

impl<F> WillListener for F
where
    F: Fn(&Changeset) -> ListenerResult + Send + Sync,
{
    fn on_will(&self, changeset: &Changeset) -> ListenerResult {
        self(changeset)
    }
}

/// Finally-phase listener
pub trait FinallyListener: Send + Sync {
    /// Called after the transaction has been applied
    fn on_finally(&self, changeset: &Changeset) -> Result<()>;
}

impl<F> FinallyListener for F
where
    F: Fn(&Changeset) -> Result<()> + Send + Sync,
{
    fn on_finally(&self, changeset: &Changeset) -> Result<()> {
        self(changeset)
    }
}

/// Validates a container's projected state before it is applied
pub trait Validator: Send + Sync {
    /// Return every problem found; an empty vector means valid
    fn validate(&self, container: &Container, state: &ContainerState) -> Vec<ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Container, &ContainerState) -> Vec<ValidationError> + Send + Sync,
{
    fn validate(&self, container: &Container, state: &ContainerState) -> Vec<ValidationError> {
        self(container, state)
    }
}

type Registered<L> = RwLock<Vec<(ListenerId, Arc<L>)>>;

/// Per-container listener registry
#[derive(Default)]
pub(crate) struct Listeners {
    init: Registered<dyn InitListener>,
    will: Registered<dyn WillListener>,
    finally: Registered<dyn FinallyListener>,
    validators: Registered<dyn Validator>,
}

impl Listeners {
    pub(crate) fn add_init(&self, listener: Arc<dyn InitListener>) -> ListenerId {
        let id = ListenerId::next();
        self.init.write().push((id, listener));
        id
    }

    pub(crate) fn add_will(&self, listener: Arc<dyn WillListener>) -> ListenerId {
        let id = ListenerId::next();
        self.will.write().push((id, listener));
        id
    }

    pub(crate) fn add_finally(&self, listener: Arc<dyn FinallyListener>) -> ListenerId {
        let id = ListenerId::next();
        self.finally.write().push((id, listener));
        id
    }

    pub(crate) fn add_validator(&self, validator: Arc<dyn Validator>) -> ListenerId {
        let id = ListenerId::next();
        self.validators.write().push((id, validator));
        id
    }

    /// Remove a listener of any phase; returns whether it was registered
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        fn remove_from<L: ?Sized>(list: &Registered<L>, id: ListenerId) -> bool {
            let mut list = list.write();
            let before = list.len();
            list.retain(|(registered, _)| *registered != id);
            list.len() != before
        }
        remove_from(&self.init, id)
            || remove_from(&self.will, id)
            || remove_from(&self.finally, id)
            || remove_from(&self.validators, id)
    }

    pub(crate) fn has_init(&self) -> bool {
        !self.init.read().is_empty()
    }

    // Snapshots, so no lock is held while listeners run
    pub(crate) fn init(&self) -> Vec<(ListenerId, Arc<dyn InitListener>)> {
        self.init.read().clone()
    }

    pub(crate) fn will(&self) -> Vec<(ListenerId, Arc<dyn WillListener>)> {
        self.will.read().clone()
    }

    pub(crate) fn finally(&self) -> Vec<(ListenerId, Arc<dyn FinallyListener>)> {
        self.finally.read().clone()
    }

    pub(crate) fn validators(&self) -> Vec<(ListenerId, Arc<dyn Validator>)> {
        self.validators.read().clone()
    }
}
