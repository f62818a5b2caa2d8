//! Operation envelope, payload variants, and signing (spec §3, §4.1).
//!
//! `OpEnvelope` is the signed, immutable unit of replication. Its payload is
//! kept as opaque CBOR bytes tagged by `OpType`; callers decode it into the
//! concrete payload struct they expect with `decode_payload`, mirroring how
//! the rest of the `crdt` module already consumes it.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crdt::codec::{CodecError, RawEnvelope};
use crate::crdt::ids::{DeviceId, GroupId, OpId, OpNonce};
use crate::crypto::signing::{self, SigningError};

#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("payload encode error: {0}")]
    PayloadEncode(String),
    #[error("payload decode error: {0}")]
    PayloadDecode(String),
}

/// Membership role. Spec §3 names exactly these two for `MemberInvite`;
/// the `GroupCreate` author is granted `Admin` (spec §4.4), there is no
/// separate "owner" tier.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum Role {
    Member,
    Admin,
}

/// Reason a `MemberRemove` op was issued.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum RemoveReason {
    Kick,
    Leave,
}

/// LWW register key for `MetadataSet`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum MetadataKey {
    Name,
    Topic,
    Avatar,
}

/// Tagged union discriminant, doubling as the wire `payload_tag` byte.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[repr(u8)]
pub enum OpType {
    GroupCreate = 0,
    MemberInvite = 1,
    MemberAccept = 2,
    MemberRemove = 3,
    MsgAdd = 4,
    MsgEdit = 5,
    MsgDelete = 6,
    ReactionSet = 7,
    MetadataSet = 8,
}

impl OpType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(OpType::GroupCreate),
            1 => Ok(OpType::MemberInvite),
            2 => Ok(OpType::MemberAccept),
            3 => Ok(OpType::MemberRemove),
            4 => Ok(OpType::MsgAdd),
            5 => Ok(OpType::MsgEdit),
            6 => Ok(OpType::MsgDelete),
            7 => Ok(OpType::ReactionSet),
            8 => Ok(OpType::MetadataSet),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct GroupCreatePayload {
    pub group_name: String,
    /// 32-byte symmetric group secret, held only by the creator until
    /// distributed to invitees via `MemberInvite::wrapped_group_secret`.
    pub initial_group_secret: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MemberInvitePayload {
    pub invited_device_id: DeviceId,
    pub invited_pubkey: [u8; 32],
    pub role: Role,
    /// Group secret sealed to `invited_pubkey`'s matching X25519 key
    /// (`crypto::secret::wrap_group_secret`).
    pub wrapped_group_secret: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MemberAcceptPayload {
    pub invite_op_id: OpId,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MemberRemovePayload {
    pub target_pubkey: [u8; 32],
    pub reason: RemoveReason,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MsgAddPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MsgEditPayload {
    pub target_msg_id: [u8; 32],
    pub new_ciphertext: Vec<u8>,
    pub new_nonce: [u8; 24],
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MsgDeletePayload {
    pub target_msg_id: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ReactionSetPayload {
    pub target_msg_id: [u8; 32],
    pub emoji: String,
    pub present: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MetadataSetPayload {
    pub key: MetadataKey,
    pub value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// OpEnvelope
// ---------------------------------------------------------------------------

/// A signed, immutable operation. `op_id` and `author_pubkey` are kept as
/// plain fields (not re-derived on every access) since the rest of the
/// `crdt` module reads them directly when applying ops.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OpEnvelope {
    pub op_id: OpId,
    pub group_id: GroupId,
    pub author_pubkey: [u8; 32],
    pub lamport: u64,
    pub op_type: OpType,
    payload_bytes: Vec<u8>,
    pub sig: [u8; 64],
}

impl OpEnvelope {
    /// Build, CBOR-encode the payload, and sign a new envelope. `nonce_seed`
    /// is expanded into the 16-byte `OpNonce` by zero-extending it in the
    /// high bytes — callers creating real ops should source genuinely random
    /// nonces via `crypto::csprng::random_16` and use `from_parts` instead;
    /// this constructor exists for deterministic, readable test fixtures.
    pub fn create_signed<P: Serialize>(
        group_id: GroupId,
        op_type: OpType,
        payload: &P,
        lamport: u64,
        nonce_seed: u64,
        author_pub: [u8; 32],
        author_priv: &[u8; 32],
    ) -> Result<Self, OpError> {
        let mut nonce_bytes = [0u8; 16];
        nonce_bytes[8..].copy_from_slice(&nonce_seed.to_be_bytes());
        Self::from_parts(
            group_id,
            op_type,
            payload,
            lamport,
            OpNonce(nonce_bytes),
            author_pub,
            author_priv,
        )
    }

    /// Build, encode, and sign a new envelope from an explicit nonce. This
    /// is what production call sites (the Group Manager) use, passing a
    /// freshly generated random nonce.
    pub fn from_parts<P: Serialize>(
        group_id: GroupId,
        op_type: OpType,
        payload: &P,
        lamport: u64,
        nonce: OpNonce,
        author_pub: [u8; 32],
        author_priv: &[u8; 32],
    ) -> Result<Self, OpError> {
        let mut payload_bytes = Vec::new();
        ciborium::into_writer(payload, &mut payload_bytes)
            .map_err(|e| OpError::PayloadEncode(e.to_string()))?;

        let op_id = OpId::new(DeviceId::from_pubkey(&author_pub), lamport, nonce);

        let raw = RawEnvelope {
            version: crate::crdt::codec::ENVELOPE_VERSION,
            group_id: *group_id.as_bytes(),
            author: author_pub,
            lamport,
            nonce: nonce.0,
            payload_tag: op_type.tag(),
            payload: payload_bytes.clone(),
            sig: [0u8; 64],
        };
        let signing_bytes = raw.signing_bytes();
        let sig = signing::sign_data(&signing_bytes, author_priv)?;

        Ok(OpEnvelope {
            op_id,
            group_id,
            author_pubkey: author_pub,
            lamport,
            op_type,
            payload_bytes,
            sig,
        })
    }

    /// Decode the payload as `T`. Fails with `OpError::PayloadDecode` if the
    /// bytes aren't valid CBOR for `T` — this is a per-op rejection, never
    /// fatal to the batch (spec §7).
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, OpError> {
        ciborium::from_reader(self.payload_bytes.as_slice())
            .map_err(|e| OpError::PayloadDecode(e.to_string()))
    }

    /// Bytes the signature was computed over.
    fn signing_bytes(&self) -> Vec<u8> {
        RawEnvelope {
            version: crate::crdt::codec::ENVELOPE_VERSION,
            group_id: *self.group_id.as_bytes(),
            author: self.author_pubkey,
            lamport: self.lamport,
            nonce: self.op_id.nonce.0,
            payload_tag: self.op_type.tag(),
            payload: self.payload_bytes.clone(),
            sig: [0u8; 64],
        }
        .signing_bytes()
    }

    /// Verify the Ed25519 signature against the envelope's declared author.
    pub fn verify_signature(&self) -> bool {
        signing::verify_signature(&self.signing_bytes(), &self.sig, &self.author_pubkey)
            .unwrap_or(false)
    }

    /// Canonical wire encoding of this op (spec §4.1).
    pub fn encode(&self) -> Result<Vec<u8>, OpError> {
        let raw = RawEnvelope {
            version: crate::crdt::codec::ENVELOPE_VERSION,
            group_id: *self.group_id.as_bytes(),
            author: self.author_pubkey,
            lamport: self.lamport,
            nonce: self.op_id.nonce.0,
            payload_tag: self.op_type.tag(),
            payload: self.payload_bytes.clone(),
            sig: self.sig,
        };
        Ok(raw.encode()?)
    }

    /// Decode a single op from its canonical wire bytes. Does not verify
    /// the signature — callers must call `verify_signature` before trusting
    /// the envelope (the State Engine does this on every `apply`).
    pub fn decode(bytes: &[u8]) -> Result<Self, OpError> {
        let raw = RawEnvelope::decode(bytes)?;
        let op_type = OpType::from_tag(raw.payload_tag)?;
        let op_id = OpId::new(
            DeviceId::from_pubkey(&raw.author),
            raw.lamport,
            OpNonce(raw.nonce),
        );
        Ok(OpEnvelope {
            op_id,
            group_id: GroupId::from_bytes(raw.group_id),
            author_pubkey: raw.author,
            lamport: raw.lamport,
            op_type,
            payload_bytes: raw.payload,
            sig: raw.sig,
        })
    }

    /// `msg_id` derived deterministically from `op_id` (spec §9 resolved
    /// open question). Only meaningful for `MsgAdd` ops.
    pub fn derived_msg_id(&self) -> [u8; 32] {
        self.op_id.derive_msg_id()
    }
}
