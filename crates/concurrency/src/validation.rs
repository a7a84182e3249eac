//! Baseline validation for set-aside transactions
//!
//! A transaction that was set aside (its root scope exited without
//! committing) may be re-entered later. Before that happens, every changeset
//! must still be based on its owner's committed version:
//!
//! - Each changeset captured `owner_version_at_start` when it was created
//! - If the owner has since been committed by another transaction, the
//!   captured baseline is stale and the transaction is rejected
//! - Only committed versions matter; pending edits in other transactions do
//!   not conflict

use crate::changeset::Changeset;
use typegraph_core::{Rejection, Uid};

/// Types of conflicts that can occur during transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// The owner of a changeset was committed after the changeset captured
    /// its baseline version
    StaleBaseline {
        /// Container whose committed version moved
        uid: Uid,
        /// Version captured when the changeset was created
        base_version: u64,
        /// Committed version found at validation time
        current_version: u64,
    },
}

/// Result of transaction validation
///
/// Accumulates all conflicts found during validation.
/// A transaction may be re-entered only if is_valid() returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Rejection reported for the first conflict, if any
    pub fn into_rejection(self) -> Option<Rejection> {
        self.conflicts.into_iter().next().map(|conflict| match conflict {
            ConflictType::StaleBaseline {
                uid,
                base_version,
                current_version,
            } => Rejection::Concurrency {
                uid,
                base_version,
                current_version,
            },
        })
    }
}

/// Check every changeset's baseline against its owner's committed version
///
/// Conflicts are reported in changeset order.
pub fn validate_baselines(changesets: &[Changeset]) -> ValidationResult {
    let mut result = ValidationResult::ok();

    for changeset in changesets {
        result.merge(validate_baseline(changeset));
    }

    result
}

fn validate_baseline(changeset: &Changeset) -> ValidationResult {
    let current_version = changeset.owner().version();
    let base_version = changeset.owner_version_at_start();
    if current_version > base_version {
        return ValidationResult::conflict(ConflictType::StaleBaseline {
            uid: changeset.owner().uid(),
            base_version,
            current_version,
        });
    }
    ValidationResult::ok()
}
