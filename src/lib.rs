//! typegraph - transactional change tracking for in-memory object graphs
//!
//! typegraph tracks changes to a graph of shared containers (property maps
//! and lists) inside nested, versioned transactions, and provides a filter
//! algebra for querying container properties.
//!
//! # Quick Start
//!
//! ```ignore
//! use typegraph::{Complex, Filter, List, TransactionManager};
//!
//! let manager = TransactionManager::new();
//! let ada = Complex::new(&manager);
//! let people = List::new(&manager);
//!
//! // Everything inside `run` commits atomically
//! manager.run(|_| {
//!     ada.set("name", "Ada")?;
//!     ada.set("team", "core")?;
//!     people.push(&ada)?;
//!     Ok(())
//! })?;
//!
//! let core = Filter::equal("team", "core");
//! assert_eq!(core.select(&people)?, vec![ada]);
//! ```
//!
//! # Architecture
//!
//! - `typegraph-core`: errors, uids and primitive values
//! - `typegraph-concurrency`: containers, changesets and the transaction engine
//! - `typegraph-primitives`: `Complex` and `List` facades
//! - `typegraph-filter`: filters, DNF normalization and subtraction

pub use typegraph_concurrency::{
    AmbientRef, ChangeKind, ChangeRef, Changeset, CommitInfo, CommittedScope, Container,
    ContainerKind, ContainerState, FinallyListener, InitListener, ListenerId, ListenerResult,
    Member, Pending, PrimitiveChange, RecordedChange, Slot, Transaction, TransactionConfig,
    TransactionManager, TransactionScope, TransactionStatus, Validator, WillListener,
    BASE_VERSION,
};
pub use typegraph_core::{Error, Rejection, Result, Uid, ValidationError, Value};
pub use typegraph_filter::{Element, Filter, FilterKind, FilterSpec, Predicate, Terminal, Transformer};
pub use typegraph_primitives::{Complex, List};
