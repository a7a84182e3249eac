//! Error types for typegraph
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Taxonomy
//!
//! - [`Error::InvalidOperation`]: a call that is illegal in the current state
//!   (mutating a read-only changeset, committing with nested scopes open,
//!   exiting scopes out of order). Raised synchronously, never retried.
//! - [`Error::Rejected`]: the transaction was rejected. The [`Rejection`]
//!   says why: a concurrency conflict detected on re-entry, validation
//!   errors collected in the will phase, or a veto.
//! - [`Error::UnbalancedCommit`]: the commit-finally stack was left unbalanced
//!   by a nested transaction.

use crate::types::Uid;
use std::fmt;
use thiserror::Error;

/// Result type alias for typegraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for typegraph
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The transaction was rejected and applied nothing
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] Rejection),

    /// A nested transaction left the commit-finally stack unbalanced
    #[error("Unbalanced commit: expected transaction {expected} on top of the commit stack, found {found:?}")]
    UnbalancedCommit {
        /// Transaction that was finishing its finally phase
        expected: u64,
        /// Transaction actually found on top of the stack (None if empty)
        found: Option<u64>,
    },

    /// A required argument was missing or empty
    #[error("Argument required: {0}")]
    ArgumentRequired(String),

    /// An argument had an invalid value
    #[error("Invalid argument '{name}': {reason}")]
    ArgumentInvalid {
        /// Argument name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A changeset was used after its transaction was dropped
    #[error("Transaction dropped while changeset was still in use")]
    TransactionDropped,

    /// Configuration could not be parsed or serialized
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// Create an invalid argument error
    pub fn argument_invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ArgumentInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a transaction rejection
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }

    /// Get the rejection reason, if this error is a rejection
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Reason a transaction was rejected
///
/// Rejection is terminal: a rejected transaction never applies any change
/// and every further scope operation on it fails with the same rejection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Rejection {
    /// A target container was committed by someone else after this
    /// transaction captured its baseline version
    #[error("concurrency conflict on container {uid}: changes based on version {base_version}, container is now at version {current_version}")]
    Concurrency {
        /// Container whose committed version moved
        uid: Uid,
        /// Version captured when the changeset was created
        base_version: u64,
        /// Committed version found on re-entry
        current_version: u64,
    },

    /// Validation failed in the will phase
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// A listener or the caller explicitly vetoed the transaction
    #[error("{0}")]
    Vetoed(String),

    /// Init listeners kept mutating their changeset past the pass budget
    #[error("init phase did not settle after {passes} passes")]
    Unsettled {
        /// Number of passes that were run
        passes: usize,
    },
}

impl Rejection {
    /// Create a veto rejection
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Rejection::Vetoed(reason.into())
    }
}

/// A single validation error reported for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Container the error was reported for
    pub uid: Uid,
    /// Offending property, when the error is property-specific
    pub property: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl ValidationError {
    /// Create a container-level validation error
    pub fn new(uid: Uid, message: impl Into<String>) -> Self {
        Self {
            uid,
            property: None,
            message: message.into(),
        }
    }

    /// Create a property-level validation error
    pub fn for_property(uid: Uid, property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid,
            property: Some(property.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}: {}", self.uid, property, self.message),
            None => write!(f, "{}: {}", self.uid, self.message),
        }
    }
}
