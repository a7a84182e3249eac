//! Init-phase scheduling queue
//!
//! Changesets are popped by descending net order, so referenced containers
//! settle before their referrers observe them. Ties go to the changeset
//! created first.
//!
//! The queue is dynamic: a changeset whose net order grew, or whose
//! transaction version moved since it last settled, can be pushed again.
//! Stale heap entries are skipped on pop rather than removed on push.

use crate::changeset::Changeset;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use typegraph_core::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    net_order: u32,
    ordinal: Reverse<usize>,
    uid: Uid,
}

#[derive(Debug, Default)]
pub(crate) struct InitQueue {
    heap: BinaryHeap<Entry>,
    /// Net order of the live entry per changeset
    queued: FxHashMap<Uid, u32>,
    /// Transaction version at which each changeset last settled
    settled: FxHashMap<Uid, u64>,
}

impl InitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue a changeset at its current net order
    ///
    /// Returns false if the changeset is already queued at that order or
    /// settled at its current transaction version.
    pub(crate) fn push(&mut self, changeset: &Changeset) -> bool {
        let uid = changeset.owner().uid();
        if self.settled.get(&uid) == Some(&changeset.transaction_version()) {
            return false;
        }
        let net_order = changeset.net_order();
        if self.queued.get(&uid) == Some(&net_order) {
            return false;
        }
        self.queued.insert(uid, net_order);
        self.heap.push(Entry {
            net_order,
            ordinal: Reverse(changeset.ordinal()),
            uid,
        });
        true
    }

    /// Pop the changeset with the highest net order
    pub(crate) fn pop(&mut self) -> Option<Uid> {
        while let Some(entry) = self.heap.pop() {
            if self.queued.get(&entry.uid) == Some(&entry.net_order) {
                self.queued.remove(&entry.uid);
                return Some(entry.uid);
            }
        }
        None
    }

    /// Record that a changeset settled at `version`
    pub(crate) fn settle(&mut self, uid: Uid, version: u64) {
        self.settled.insert(uid, version);
    }
}
