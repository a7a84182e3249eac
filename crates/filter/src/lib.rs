//! Filter algebra for typegraph
//!
//! Boolean filters over element properties:
//! - Filter: shared expression tree with `and`, `or`, `negate`, `contains`
//! - Terminal: leaf predicates (equality, membership, ordering, pattern)
//! - DNF: memoized disjunctive normal form with clause simplification
//! - `and_not`: subtraction computed on normal forms without expanding `¬b`
//! - FilterSpec: serde representation

#![warn(missing_docs)]
#![warn(clippy::all)]

mod dnf;
pub mod element;
pub mod filter;
pub mod spec;
mod subtract;
pub mod terminal;

pub use element::Element;
pub use filter::{Filter, FilterKind, Transformer};
pub use spec::FilterSpec;
pub use terminal::{Predicate, Terminal};
