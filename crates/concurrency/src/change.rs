//! Primitive changes
//!
//! A primitive change is the smallest unit of mutation: one property
//! replacement or one list operation. Changes are immutable once recorded;
//! the transaction stamps each with the transaction version at which it was
//! recorded.

use crate::container::Container;
use crate::state::{Member, Slot};
use std::fmt;

/// Discriminant of a [`PrimitiveChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Property replacement
    Replace,
    /// List insertion
    Add,
    /// List removal
    Remove,
    /// List element move
    Move,
    /// List reordering
    Sort,
    /// List clearing
    Clear,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Replace => "replace",
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Move => "move",
            ChangeKind::Sort => "sort",
            ChangeKind::Clear => "clear",
        };
        write!(f, "{}", name)
    }
}

/// Smallest unit of mutation of one container
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveChange {
    /// Replace the value of a property (`None` means absent)
    Replace {
        /// Property name
        property: String,
        /// Previous member, as projected when the change was recorded
        old: Option<Member>,
        /// New member
        new: Option<Member>,
    },
    /// Insert members at a position
    Add {
        /// Insertion index
        index: usize,
        /// Inserted members, in order
        members: Vec<Member>,
    },
    /// Remove a contiguous run of members
    Remove {
        /// Index of the first removed member
        index: usize,
        /// Removed members, in order
        members: Vec<Member>,
    },
    /// Move one member
    Move {
        /// Index before the move
        from: usize,
        /// Index after the move
        to: usize,
    },
    /// Reorder all members: new position `i` takes old position `permutation[i]`
    Sort {
        /// Permutation of the old positions
        permutation: Vec<usize>,
    },
    /// Remove all members
    Clear {
        /// Members that were removed
        members: Vec<Member>,
    },
}

/// Container references gained and lost by a change
#[derive(Debug, Default)]
pub struct ReferenceDelta {
    /// Containers newly referenced, with the referencing slot
    pub added: Vec<(Slot, Container)>,
    /// Containers no longer referenced, with the slot they were held in
    pub removed: Vec<(Slot, Container)>,
}

impl ReferenceDelta {
    /// Whether the change touched no container references
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn containers_in<'a>(
    members: impl IntoIterator<Item = &'a Member>,
    slot: &Slot,
) -> Vec<(Slot, Container)> {
    members
        .into_iter()
        .filter_map(|m| m.as_container().map(|c| (slot.clone(), c.clone())))
        .collect()
}

impl PrimitiveChange {
    /// Get the kind of this change
    pub fn kind(&self) -> ChangeKind {
        match self {
            PrimitiveChange::Replace { .. } => ChangeKind::Replace,
            PrimitiveChange::Add { .. } => ChangeKind::Add,
            PrimitiveChange::Remove { .. } => ChangeKind::Remove,
            PrimitiveChange::Move { .. } => ChangeKind::Move,
            PrimitiveChange::Sort { .. } => ChangeKind::Sort,
            PrimitiveChange::Clear { .. } => ChangeKind::Clear,
        }
    }

    /// Container references this change adds and removes
    ///
    /// Moves and sorts keep the same set of references.
    pub fn reference_delta(&self) -> ReferenceDelta {
        match self {
            PrimitiveChange::Replace { property, old, new } => {
                let slot = Slot::Property(property.clone());
                ReferenceDelta {
                    added: containers_in(new.iter(), &slot),
                    removed: containers_in(old.iter(), &slot),
                }
            }
            PrimitiveChange::Add { members, .. } => ReferenceDelta {
                added: containers_in(members, &Slot::Element),
                removed: Vec::new(),
            },
            PrimitiveChange::Remove { members, .. } | PrimitiveChange::Clear { members } => {
                ReferenceDelta {
                    added: Vec::new(),
                    removed: containers_in(members, &Slot::Element),
                }
            }
            PrimitiveChange::Move { .. } | PrimitiveChange::Sort { .. } => ReferenceDelta::default(),
        }
    }
}

/// A primitive change together with its transaction version stamp
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedChange {
    /// The change
    pub change: PrimitiveChange,
    /// Transaction version at which the change was recorded
    pub version: u64,
}
