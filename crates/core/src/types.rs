//! Core identity types
//!
//! - Uid: process-unique, stable identifier for containers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a container
///
/// A Uid is assigned once, when the container is created, and never changes.
/// Uids are allocated from a process-wide counter, so two containers never
/// share one even when they belong to different transaction managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(u64);

impl Uid {
    /// Allocate the next process-unique Uid
    pub fn next() -> Self {
        Self(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identifier
    ///
    /// Intended for tests and diagnostics; identifiers built this way are not
    /// reserved against [`Uid::next`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
