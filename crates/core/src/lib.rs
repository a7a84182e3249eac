//! Core types for typegraph
//!
//! This crate defines the foundational types used throughout the system:
//! - Uid: Process-unique identifier for containers
//! - Value: Primitive values held by container properties and list elements
//! - Error: Error type hierarchy, including transaction rejections

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod value;

pub use error::{Error, Rejection, Result, ValidationError};
pub use types::Uid;
pub use value::Value;
