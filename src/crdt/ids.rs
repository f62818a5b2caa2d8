//! Identifiers used throughout the CRDT engine.
//!
//! `DeviceId` wraps an Ed25519 public key, `GroupId` is content-derived from
//! its creator, and `OpId` is the triple that makes every operation globally
//! unique and gives the engine a deterministic tie-break order.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// An Ed25519 public key identifying a device/author.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub [u8; 32]);

impl DeviceId {
    /// Derive a `DeviceId` from a raw Ed25519 public key.
    pub fn from_pubkey(pubkey: &[u8; 32]) -> Self {
        DeviceId(*pubkey)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(DeviceId(arr))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({}..)", &self.to_hex()[..8])
    }
}

/// A group identifier: SHA-256 of the creator's device id and a random seed,
/// presented as 64-char lowercase hex. Content-derived rather than purely
/// random so that two independently-created groups can never collide even
/// if their creators pick the same seed bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub [u8; 32]);

impl GroupId {
    /// Derive a new `GroupId` from the creating device and 32 bytes of
    /// randomness (see `crypto::csprng::random_32`).
    pub fn new(creator: &DeviceId, seed: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"lanternfly-group-id-v1");
        hasher.update(creator.as_bytes());
        hasher.update(seed);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        GroupId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(GroupId(arr))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        GroupId(bytes)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({}..)", &self.to_hex()[..8])
    }
}

/// 16 random bytes distinguishing ops sharing an `(author, lamport)` pair —
/// only possible if an author crashes and re-derives the same lamport, or
/// two local threads race a single author's clock (which the `Clock`
/// prevents, but the nonce is cheap insurance at the wire level regardless).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpNonce(pub [u8; 16]);

impl OpNonce {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for OpNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpNonce({}..)", &self.to_hex()[..8])
    }
}

/// Globally unique operation identifier: `(author, lamport, nonce)`.
///
/// Ordering is lexicographic over the tuple, which is also the engine's
/// deterministic tie-break order: when two ops share a lamport, the
/// numerically smaller `OpId` wins (smaller author pubkey first, then
/// smaller nonce).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug)]
pub struct OpId {
    pub author: DeviceId,
    pub lamport: u64,
    pub nonce: OpNonce,
}

impl OpId {
    pub fn new(author: DeviceId, lamport: u64, nonce: OpNonce) -> Self {
        OpId {
            author,
            lamport,
            nonce,
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:016x}:{}",
            self.author.to_hex(),
            self.lamport,
            self.nonce.to_hex()
        )
    }
}

impl OpId {
    /// Deterministic 32-byte derivation used as `msg_id` for `MsgAdd` ops
    /// (spec §3/§9: `msg_id := op_id`, fixed to a single representation
    /// rather than the teacher's legacy mix of fresh ids and op-id strings).
    pub fn derive_msg_id(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"lanternfly-msg-id-v1");
        hasher.update(self.author.as_bytes());
        hasher.update(self.lamport.to_be_bytes());
        hasher.update(self.nonce.0);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// Durable dedup key: `"sha256:<hex>"` over the canonical envelope bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }

    pub fn to_key_string(&self) -> String {
        format!("sha256:{}", hex::encode(self.0))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &hex::encode(self.0)[..8])
    }
}
