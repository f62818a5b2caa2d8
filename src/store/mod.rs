//! Durable op log store (spec §4.3).
//!
//! `OpLogStore` is the contract the engine needs from whatever persistence
//! layer an embedding application provides — a SQLite table, a key-value
//! store, a file — this crate neither assumes nor implements durability
//! itself beyond the in-memory reference implementation used in tests and
//! by single-process examples.
//!
//! Insertion is keyed by content hash (`ContentHash::to_key_string`) so a
//! duplicate op received twice (once via direct send, once via sync) is a
//! no-op rather than a second row.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::crdt::ids::GroupId;
use crate::crdt::ops::OpEnvelope;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to encode op for storage: {0}")]
    Encode(String),
    #[error("failed to decode stored op: {0}")]
    Decode(String),
}

/// External keyed store of signed ops for a single group.
///
/// Implementations only need to persist opaque bytes keyed by content
/// hash; decoding and validation is the engine's job, not the store's.
pub trait OpLogStore {
    /// Insert an op, keyed by its content hash. Returns `false` without
    /// error if an op with the same content hash already exists (the
    /// dedup the spec calls a "soft" duplicate).
    fn insert(&mut self, group_id: GroupId, op: &OpEnvelope) -> Result<bool, StoreError>;

    /// All ops for a group, ordered by `(lamport, arrival_seq)` — the order
    /// they should be replayed in for a fresh load.
    fn scan(&self, group_id: &GroupId) -> Result<Vec<OpEnvelope>, StoreError>;

    /// The highest lamport stored for a group, or 0 if none.
    fn max_lamport(&self, group_id: &GroupId) -> u64;

    /// Ops with `lamport > cursor`, in arrival order — the unit of work a
    /// sync round pulls from a peer (spec §4.6).
    fn scan_since(&self, group_id: &GroupId, cursor: u64) -> Result<Vec<OpEnvelope>, StoreError>;

    /// Drop every op for a group (e.g. on leave/remove).
    fn delete_group(&mut self, group_id: &GroupId) -> Result<(), StoreError>;
}

/// A single stored record: the op plus its local arrival order, used to
/// break ties among ops sharing a lamport when replaying a fresh load.
#[derive(Clone, Debug)]
struct StoredOp {
    op: OpEnvelope,
    arrival_seq: u64,
}

/// Reference in-memory `OpLogStore`. Not durable across process restarts —
/// real deployments back this trait with SQLite, sled, or similar; this
/// implementation exists for tests and examples.
#[derive(Default)]
pub struct InMemoryOpLogStore {
    groups: BTreeMap<GroupId, BTreeMap<String, StoredOp>>,
    next_seq: u64,
}

impl InMemoryOpLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpLogStore for InMemoryOpLogStore {
    fn insert(&mut self, group_id: GroupId, op: &OpEnvelope) -> Result<bool, StoreError> {
        let encoded = op.encode().map_err(|e| StoreError::Encode(e.to_string()))?;
        let key = crate::crdt::ids::ContentHash::of(&encoded).to_key_string();

        let seq = self.next_seq;
        let group = self.groups.entry(group_id).or_default();
        if group.contains_key(&key) {
            return Ok(false);
        }
        group.insert(
            key,
            StoredOp {
                op: op.clone(),
                arrival_seq: seq,
            },
        );
        self.next_seq += 1;
        Ok(true)
    }

    fn scan(&self, group_id: &GroupId) -> Result<Vec<OpEnvelope>, StoreError> {
        let mut ordered: Vec<&StoredOp> = self
            .groups
            .get(group_id)
            .map(|g| g.values().collect())
            .unwrap_or_default();
        ordered.sort_by_key(|s| (s.op.lamport, s.arrival_seq));
        Ok(ordered.into_iter().map(|s| s.op.clone()).collect())
    }

    fn max_lamport(&self, group_id: &GroupId) -> u64 {
        self.groups
            .get(group_id)
            .and_then(|g| g.values().map(|s| s.op.lamport).max())
            .unwrap_or(0)
    }

    fn scan_since(&self, group_id: &GroupId, cursor: u64) -> Result<Vec<OpEnvelope>, StoreError> {
        let mut ordered = self.scan(group_id)?;
        ordered.retain(|op| op.lamport > cursor);
        Ok(ordered)
    }

    fn delete_group(&mut self, group_id: &GroupId) -> Result<(), StoreError> {
        self.groups.remove(group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::DeviceId;
    use crate::crdt::ops::{GroupCreatePayload, OpEnvelope, OpType};
    use crate::crypto::signing::generate_keypair;

    fn group_of(pubkey: [u8; 32]) -> GroupId {
        GroupId::new(&DeviceId::from_pubkey(&pubkey), &[0x07; 32])
    }

    fn make_create(gid: GroupId, pub_k: [u8; 32], priv_k: &[u8; 32], lamport: u64, nonce: u64) -> OpEnvelope {
        let payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x01; 32],
        };
        OpEnvelope::create_signed(gid, OpType::GroupCreate, &payload, lamport, nonce, pub_k, priv_k).unwrap()
    }

    #[test]
    fn insert_dedupes_by_content_hash() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op = make_create(gid, pub_k, &priv_k, 1, 1);

        let mut store = InMemoryOpLogStore::new();
        assert!(store.insert(gid, &op).unwrap());
        assert!(!store.insert(gid, &op).unwrap());
        assert_eq!(store.scan(&gid).unwrap().len(), 1);
    }

    #[test]
    fn scan_orders_by_lamport_then_arrival() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op_a = make_create(gid, pub_k, &priv_k, 5, 1);
        let op_b = make_create(gid, pub_k, &priv_k, 2, 2);

        let mut store = InMemoryOpLogStore::new();
        store.insert(gid, &op_a).unwrap();
        store.insert(gid, &op_b).unwrap();

        let scanned = store.scan(&gid).unwrap();
        assert_eq!(scanned[0].lamport, 2);
        assert_eq!(scanned[1].lamport, 5);
    }

    #[test]
    fn scan_since_filters_by_cursor() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op_a = make_create(gid, pub_k, &priv_k, 1, 1);
        let op_b = make_create(gid, pub_k, &priv_k, 9, 2);

        let mut store = InMemoryOpLogStore::new();
        store.insert(gid, &op_a).unwrap();
        store.insert(gid, &op_b).unwrap();

        let since = store.scan_since(&gid, 1).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].lamport, 9);
    }

    #[test]
    fn delete_group_clears_everything() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op = make_create(gid, pub_k, &priv_k, 1, 1);

        let mut store = InMemoryOpLogStore::new();
        store.insert(gid, &op).unwrap();
        store.delete_group(&gid).unwrap();

        assert_eq!(store.max_lamport(&gid), 0);
        assert!(store.scan(&gid).unwrap().is_empty());
    }
}
