//! Lamport clock — one counter per group, advanced by every op observed.
//!
//! No wall clock participates in ordering. An author's own lamports are
//! strictly increasing; across authors only the partial order plus the
//! `OpId` tie-break (see `crdt::ids`) holds.
use std::collections::HashMap;

use crate::crdt::ids::GroupId;

/// Tracks the highest lamport seen so far, per group.
#[derive(Debug, Default)]
pub struct LamportClock {
    max_seen: HashMap<GroupId, u64>,
}

impl LamportClock {
    pub fn new() -> Self {
        LamportClock {
            max_seen: HashMap::new(),
        }
    }

    /// The largest lamport observed for `group`, or 0 if none yet.
    pub fn max_lamport(&self, group: &GroupId) -> u64 {
        self.max_seen.get(group).copied().unwrap_or(0)
    }

    /// The lamport a *newly created* local op should carry: one greater
    /// than the largest seen so far. Does not itself advance the clock —
    /// call `observe` once the op is actually persisted so a failed
    /// persist doesn't burn a lamport value.
    pub fn next_lamport(&self, group: &GroupId) -> u64 {
        self.max_lamport(group) + 1
    }

    /// Merge in an observed lamport (from a local create or a received op).
    /// Monotonic: never moves the clock backwards.
    pub fn observe(&mut self, group: GroupId, lamport: u64) {
        let entry = self.max_seen.entry(group).or_insert(0);
        if lamport > *entry {
            *entry = lamport;
        }
    }

    /// Drop all clock state for a group (mirrors `OpLogStore::delete_group`).
    pub fn forget(&mut self, group: &GroupId) {
        self.max_seen.remove(group);
    }
}
