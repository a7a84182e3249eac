//! Primitives layer for typegraph
//!
//! Provides typed facades over [`Container`](typegraph_concurrency::Container):
//! - **Complex**: named properties
//! - **List**: ordered elements
//!
//! ## Design Principle: Stateless Facades
//!
//! A facade holds only the container handle. Reads see the ambient
//! transaction's projected state, and every mutator goes through
//! [`Container::mutate`](typegraph_concurrency::Container::mutate), so it
//! joins the ambient transaction or commits on its own:
//!
//! ```rust,ignore
//! use typegraph_concurrency::TransactionManager;
//! use typegraph_primitives::{Complex, List};
//!
//! let manager = TransactionManager::new();
//! let person = Complex::new(&manager);
//! let people = List::new(&manager);
//!
//! manager.run(|_| {
//!     person.set("name", "Ada")?;
//!     people.push(&person)?;
//!     Ok(())
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod complex;
pub mod list;

pub use complex::Complex;
pub use list::List;
