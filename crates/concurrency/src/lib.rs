//! Transactional change tracking for typegraph
//!
//! This crate implements versioned, nested transactions over an in-memory
//! graph of containers:
//! - Container: shared value object with a uid, a version and committed state
//! - Changeset: pending primitive changes for one container in one transaction
//! - ChangeRef: projected incoming references, used to propagate changes to referrers
//! - Transaction: owns changesets and runs the init → will → do → finally commit
//! - TransactionManager: the ambient transaction context and global version counter
//! - TransactionScope / CommittedScope: guards making a transaction (or none) ambient

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod change_ref;
pub mod changeset;
pub mod config;
pub mod container;
pub mod listener;
pub mod manager;
pub mod pending;
mod phase;
mod queue;
pub mod scope;
pub mod state;
pub mod transaction;
pub mod validation;

pub use change::{ChangeKind, PrimitiveChange, RecordedChange, ReferenceDelta};
pub use change_ref::ChangeRef;
pub use changeset::Changeset;
pub use config::TransactionConfig;
pub use container::{AmbientRef, Container, WeakContainer, BASE_VERSION};
pub use listener::{
    FinallyListener, InitListener, ListenerId, ListenerResult, Validator, WillListener,
};
pub use manager::TransactionManager;
pub use pending::Pending;
pub use scope::{CommittedScope, TransactionScope};
pub use state::{ContainerKind, ContainerState, Member, Slot};
pub use transaction::{CommitInfo, Transaction, TransactionStatus};
pub use validation::{validate_baselines, ConflictType, ValidationResult};
