//! Pull-based anti-entropy sync protocol and invite bootstrap (spec §4.6).
//!
//! Three wire message kinds, each tagged by a leading byte so a transport
//! adapter can dispatch inbound bytes without unpacking the body first:
//!
//! - `OP_BROADCAST` (`0x30`) — a single freshly-created op, pushed eagerly
//!   to every other known member.
//! - `SYNC_REQUEST` (`0x32`) — "send me everything after this lamport."
//! - `SYNC_CHUNK` (`0x33`) — a bounded batch of ops answering a request.
//!
//! A `MemberInvite`'s bootstrap bundle is just a `SyncChunk` carrying the
//! group's entire op log (cursor 0), followed by the invitee's own
//! `MemberAccept` — from the engine's perspective there is nothing special
//! about bootstrap beyond the sync round being a full rather than
//! incremental one.
use serde::{Deserialize, Serialize};

use crate::crdt::codec::{pack_frames, unpack_frames, CodecError, MAX_OP_BYTES};
use crate::crdt::ids::GroupId;
use crate::crdt::limits::{MAX_BYTES_PER_SYNC_ROUND, MAX_OPS_PER_CHUNK, MAX_OPS_PER_SYNC_ROUND};
use crate::crdt::ops::{OpEnvelope, OpError};

pub const WIRE_TYPE_OP_BROADCAST: u8 = 0x30;
pub const WIRE_TYPE_SYNC_REQUEST: u8 = 0x32;
pub const WIRE_TYPE_SYNC_CHUNK: u8 = 0x33;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error("unknown wire type byte: {0:#04x}")]
    UnknownWireType(u8),
    #[error("sync chunk exceeds {MAX_OPS_PER_CHUNK} ops")]
    ChunkTooLarge,
    #[error("sync round exceeds {MAX_BYTES_PER_SYNC_ROUND} bytes")]
    RoundTooLarge,
}

/// "Send me everything you have for this group after `cursor`, at most
/// `limit` ops."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub group_id: [u8; 32],
    pub cursor: u64,
    pub limit: u32,
}

/// A bounded batch of ops answering a `SyncRequest` (or bootstrapping an
/// invite, when `cursor` in the originating request was 0).
pub struct SyncChunk {
    pub group_id: [u8; 32],
    pub ops: Vec<OpEnvelope>,
    /// True if the responder has more ops beyond this chunk — the
    /// requester should issue another `SyncRequest` with the new max
    /// lamport observed in this chunk as its cursor.
    pub has_more: bool,
}

impl SyncRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 8 + 4);
        out.push(WIRE_TYPE_SYNC_REQUEST);
        out.extend_from_slice(&self.group_id);
        out.extend_from_slice(&self.cursor.to_be_bytes());
        out.extend_from_slice(&self.limit.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        if bytes.len() != 1 + 32 + 8 + 4 || bytes[0] != WIRE_TYPE_SYNC_REQUEST {
            return Err(SyncError::UnknownWireType(bytes.first().copied().unwrap_or(0)));
        }
        let mut group_id = [0u8; 32];
        group_id.copy_from_slice(&bytes[1..33]);
        let cursor = u64::from_be_bytes(bytes[33..41].try_into().unwrap());
        let limit = u32::from_be_bytes(bytes[41..45].try_into().unwrap());
        Ok(SyncRequest { group_id, cursor, limit })
    }
}

impl SyncChunk {
    /// Build a chunk from `ops`, splitting at `MAX_OPS_PER_CHUNK`/
    /// `MAX_BYTES_PER_SYNC_ROUND` and reporting whether more remain.
    pub fn build(group_id: GroupId, mut ops: Vec<OpEnvelope>) -> Result<Self, SyncError> {
        ops.sort_by_key(|op| op.lamport);
        let has_more = ops.len() > MAX_OPS_PER_CHUNK;
        ops.truncate(MAX_OPS_PER_CHUNK.min(MAX_OPS_PER_SYNC_ROUND));
        Ok(SyncChunk {
            group_id: *group_id.as_bytes(),
            ops,
            has_more,
        })
    }

    /// Canonical wire encoding: `0x33 | group_id:32 | packed ops`. `has_more`
    /// is resolution bookkeeping, not wire state — a decoding peer infers it
    /// from whether the chunk is full.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let mut encoded_ops = Vec::with_capacity(self.ops.len());
        let mut total = 0usize;
        for op in &self.ops {
            let bytes = op.encode()?;
            total += bytes.len();
            if total > MAX_BYTES_PER_SYNC_ROUND {
                return Err(SyncError::RoundTooLarge);
            }
            encoded_ops.push(bytes);
        }

        let mut out = Vec::with_capacity(1 + 32 + total);
        out.push(WIRE_TYPE_SYNC_CHUNK);
        out.extend_from_slice(&self.group_id);
        out.extend_from_slice(&pack_frames(encoded_ops.iter().map(|b| b.as_slice())));
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        if bytes.len() < 1 + 32 || bytes[0] != WIRE_TYPE_SYNC_CHUNK {
            return Err(SyncError::UnknownWireType(bytes.first().copied().unwrap_or(0)));
        }
        let mut group_id = [0u8; 32];
        group_id.copy_from_slice(&bytes[1..33]);

        let frames = unpack_frames(&bytes[33..]);
        if frames.len() > MAX_OPS_PER_CHUNK {
            return Err(SyncError::ChunkTooLarge);
        }
        let has_more = frames.len() >= MAX_OPS_PER_CHUNK;
        let mut ops = Vec::with_capacity(frames.len());
        for frame in frames {
            ops.push(OpEnvelope::decode(frame)?);
        }
        Ok(SyncChunk {
            group_id,
            ops,
            has_more,
        })
    }
}

/// Encode a freshly-created op as an `OP_BROADCAST` message.
pub fn encode_broadcast(op: &OpEnvelope) -> Result<Vec<u8>, SyncError> {
    let body = op.encode()?;
    if body.len() > MAX_OP_BYTES {
        return Err(SyncError::RoundTooLarge);
    }
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(WIRE_TYPE_OP_BROADCAST);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_broadcast(bytes: &[u8]) -> Result<OpEnvelope, SyncError> {
    if bytes.is_empty() || bytes[0] != WIRE_TYPE_OP_BROADCAST {
        return Err(SyncError::UnknownWireType(bytes.first().copied().unwrap_or(0)));
    }
    Ok(OpEnvelope::decode(&bytes[1..])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::DeviceId;
    use crate::crdt::ops::{GroupCreatePayload, OpType};
    use crate::crypto::signing::generate_keypair;

    fn group_of(pubkey: [u8; 32]) -> GroupId {
        GroupId::new(&DeviceId::from_pubkey(&pubkey), &[0x08; 32])
    }

    fn make_op(gid: GroupId, pub_k: [u8; 32], priv_k: &[u8; 32], lamport: u64) -> OpEnvelope {
        let payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x01; 32],
        };
        OpEnvelope::create_signed(gid, OpType::GroupCreate, &payload, lamport, 1, pub_k, priv_k).unwrap()
    }

    #[test]
    fn sync_request_roundtrip() {
        let req = SyncRequest {
            group_id: [0x42; 32],
            cursor: 17,
            limit: 128,
        };
        let decoded = SyncRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.group_id, req.group_id);
        assert_eq!(decoded.cursor, 17);
        assert_eq!(decoded.limit, 128);
    }

    #[test]
    fn sync_chunk_roundtrip() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op = make_op(gid, pub_k, &priv_k, 1);

        let chunk = SyncChunk::build(gid, vec![op.clone()]).unwrap();
        let encoded = chunk.encode().unwrap();
        let decoded = SyncChunk::decode(&encoded).unwrap();

        assert_eq!(decoded.group_id, *gid.as_bytes());
        assert!(!decoded.has_more);
        assert_eq!(decoded.ops.len(), 1);
        assert_eq!(decoded.ops[0].op_id, op.op_id);
    }

    #[test]
    fn broadcast_roundtrip() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let op = make_op(gid, pub_k, &priv_k, 1);

        let bytes = encode_broadcast(&op).unwrap();
        assert_eq!(bytes[0], WIRE_TYPE_OP_BROADCAST);
        let decoded = decode_broadcast(&bytes).unwrap();
        assert_eq!(decoded.op_id, op.op_id);
    }

    #[test]
    fn chunk_reports_has_more_when_ops_exceed_page_size() {
        let (pub_k, priv_k) = generate_keypair();
        let gid = group_of(pub_k);
        let ops: Vec<OpEnvelope> = (0..(MAX_OPS_PER_CHUNK as u64 + 5))
            .map(|i| make_op(gid, pub_k, &priv_k, i + 1))
            .collect();

        let chunk = SyncChunk::build(gid, ops).unwrap();
        assert!(chunk.has_more);
        assert_eq!(chunk.ops.len(), MAX_OPS_PER_CHUNK);
    }
}
