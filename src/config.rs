//! Runtime-tunable configuration (SPEC_FULL.md §A.3).
//!
//! `crdt::limits` fixes the protocol-level ceilings every replica must
//! agree on (max op size, hard op-count caps) as compile-time constants —
//! those can never be loosened per-deployment without breaking
//! interoperability. `GroupCrdtConfig` holds the tunables that are safe to
//! vary per embedding application: how aggressively a sync round pages
//! through a backlog.
use crate::crdt::limits;

/// Runtime sync-pacing knobs for a `GroupManager`. Defaults mirror the
/// compile-time ceilings in `crdt::limits`; embedders with tighter
/// bandwidth (e.g. mobile over Tor) can lower them without recompiling.
#[derive(Clone, Copy, Debug)]
pub struct GroupCrdtConfig {
    pub max_ops_per_sync_round: usize,
    pub max_bytes_per_sync_round: usize,
    pub max_ops_per_chunk: usize,
    pub max_concurrent_syncs: usize,
}

impl Default for GroupCrdtConfig {
    fn default() -> Self {
        GroupCrdtConfig {
            max_ops_per_sync_round: limits::MAX_OPS_PER_SYNC_ROUND,
            max_bytes_per_sync_round: limits::MAX_BYTES_PER_SYNC_ROUND,
            max_ops_per_chunk: limits::MAX_OPS_PER_CHUNK,
            max_concurrent_syncs: limits::MAX_CONCURRENT_SYNCS,
        }
    }
}
