//! Canonical binary wire format for op envelopes (spec §4.1).
//!
//! Fixed layout, big-endian, length-prefixed, no padding:
//!
//! ```text
//! version:u8 | group_id:32 | author:32 | lamport:u64 | nonce:16
//!   | payload_tag:u8 | payload_len:u32 | payload:bytes | sig:64
//! ```
//!
//! The packed stream used by transport and sync is a plain concatenation of
//! `op_len:u32 | op_bytes` frames. A single op is capped at 64 KiB; this
//! module enforces that cap and the frame-parsing abort rules but does not
//! interpret payload bytes — the payload tag just routes to the right
//! `ciborium` struct at a higher layer (`crdt::ops`).
use thiserror::Error;

/// Wire format version. Bump if the fixed-field layout ever changes.
pub const ENVELOPE_VERSION: u8 = 1;

/// Hard ceiling on a single op's total encoded size (spec §4.1).
pub const MAX_OP_BYTES: usize = 64 * 1024;

const FIXED_HEADER_LEN: usize = 1 + 32 + 32 + 8 + 16 + 1 + 4; // up to and including payload_len
const SIG_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("envelope too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown payload tag: {0}")]
    UnknownTag(u8),
    #[error("payload length {declared} exceeds remaining buffer {remaining}")]
    PayloadOverrun { declared: usize, remaining: usize },
    #[error("envelope exceeds {MAX_OP_BYTES} byte limit: {0}")]
    TooLarge(usize),
    #[error("payload decode error: {0}")]
    PayloadDecode(String),
}

/// The fixed fields of an envelope, with the payload left as opaque bytes.
/// `crdt::ops::OpEnvelope` wraps this with payload (de)serialization and
/// signing/verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEnvelope {
    pub version: u8,
    pub group_id: [u8; 32],
    pub author: [u8; 32],
    pub lamport: u64,
    pub nonce: [u8; 16],
    pub payload_tag: u8,
    pub payload: Vec<u8>,
    pub sig: [u8; 64],
}

impl RawEnvelope {
    /// Bytes covered by the signature: everything except `sig`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + self.payload.len());
        out.push(self.version);
        out.extend_from_slice(&self.group_id);
        out.extend_from_slice(&self.author);
        out.extend_from_slice(&self.lamport.to_be_bytes());
        out.extend_from_slice(&self.nonce);
        out.push(self.payload_tag);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Full canonical encoding including the trailing signature.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = self.signing_bytes();
        out.extend_from_slice(&self.sig);
        if out.len() > MAX_OP_BYTES {
            return Err(CodecError::TooLarge(out.len()));
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_OP_BYTES {
            return Err(CodecError::TooLarge(bytes.len()));
        }
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(CodecError::TooShort {
                need: FIXED_HEADER_LEN,
                got: bytes.len(),
            });
        }
        let mut pos = 0usize;
        let version = bytes[pos];
        pos += 1;
        if version != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let mut group_id = [0u8; 32];
        group_id.copy_from_slice(&bytes[pos..pos + 32]);
        pos += 32;

        let mut author = [0u8; 32];
        author.copy_from_slice(&bytes[pos..pos + 32]);
        pos += 32;

        let lamport = u64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&bytes[pos..pos + 16]);
        pos += 16;

        let payload_tag = bytes[pos];
        pos += 1;

        let payload_len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;

        let remaining = bytes.len().saturating_sub(pos + SIG_LEN);
        if payload_len > remaining {
            return Err(CodecError::PayloadOverrun {
                declared: payload_len,
                remaining,
            });
        }

        let payload = bytes[pos..pos + payload_len].to_vec();
        pos += payload_len;

        if bytes.len() < pos + SIG_LEN {
            return Err(CodecError::TooShort {
                need: pos + SIG_LEN,
                got: bytes.len(),
            });
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&bytes[pos..pos + SIG_LEN]);

        Ok(RawEnvelope {
            version,
            group_id,
            author,
            lamport,
            nonce,
            payload_tag,
            payload,
            sig,
        })
    }
}

/// Encode a sequence of already-encoded op byte strings as a packed stream:
/// `op_len:u32 | op_bytes` frames concatenated with no separator.
pub fn pack_frames<'a>(ops: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for op_bytes in ops {
        out.extend_from_slice(&(op_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(op_bytes);
    }
    out
}

/// Parse a packed stream into individual op byte slices.
///
/// A frame declaring `len == 0`, `len > MAX_OP_BYTES`, or a length that runs
/// past the end of the buffer aborts the scan — every well-formed frame
/// read *before* that point is still returned (spec §8 boundary behavior).
/// A frame whose length is valid but whose envelope fails to parse is
/// skipped (not an abort condition) and scanning continues.
pub fn unpack_frames(bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    loop {
        if bytes.len() < pos + 4 {
            break; // truncated trailing length prefix
        }
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        if len == 0 || len > MAX_OP_BYTES {
            break;
        }
        let start = pos + 4;
        let end = start + len;
        if end > bytes.len() {
            break; // truncated trailing frame
        }
        frames.push(&bytes[start..end]);
        pos = end;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> RawEnvelope {
        RawEnvelope {
            version: ENVELOPE_VERSION,
            group_id: [0x01; 32],
            author: [0x02; 32],
            lamport: 42,
            nonce: [0x03; 16],
            payload_tag: 4,
            payload,
            sig: [0x04; 64],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let env = sample(vec![1, 2, 3, 4, 5]);
        let bytes = env.encode().unwrap();
        let decoded = RawEnvelope::decode(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let env = sample(vec![]);
        let bytes = env.encode().unwrap();
        let decoded = RawEnvelope::decode(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn signing_bytes_exclude_signature() {
        let env_a = sample(vec![9, 9, 9]);
        let mut env_b = env_a.clone();
        env_b.sig = [0xFF; 64];
        assert_eq!(env_a.signing_bytes(), env_b.signing_bytes());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = RawEnvelope::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, CodecError::TooShort { .. }));
    }

    #[test]
    fn decode_rejects_unsupported_version() {
        let mut env = sample(vec![1]);
        env.version = 99;
        let mut bytes = env.signing_bytes();
        bytes.extend_from_slice(&env.sig);
        let err = RawEnvelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(99)));
    }

    #[test]
    fn decode_rejects_payload_overrun() {
        let env = sample(vec![1, 2, 3]);
        let mut bytes = env.encode().unwrap();
        // Corrupt the declared payload length to be larger than reality.
        let len_pos = 1 + 32 + 32 + 8 + 16 + 1;
        bytes[len_pos..len_pos + 4].copy_from_slice(&(200u32).to_be_bytes());
        let err = RawEnvelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::PayloadOverrun { .. }));
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let a = sample(vec![1]).encode().unwrap();
        let b = sample(vec![2, 2]).encode().unwrap();
        let packed = pack_frames([a.as_slice(), b.as_slice()]);
        let frames = unpack_frames(&packed);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], a.as_slice());
        assert_eq!(frames[1], b.as_slice());
    }

    #[test]
    fn unpack_aborts_on_zero_length_frame_but_keeps_earlier() {
        let a = sample(vec![1]).encode().unwrap();
        let mut packed = pack_frames([a.as_slice()]);
        packed.extend_from_slice(&0u32.to_be_bytes()); // len=0 frame
        packed.extend_from_slice(&pack_frames([sample(vec![9]).encode().unwrap().as_slice()]));
        let frames = unpack_frames(&packed);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], a.as_slice());
    }

    #[test]
    fn unpack_aborts_on_oversized_frame() {
        let a = sample(vec![1]).encode().unwrap();
        let mut packed = pack_frames([a.as_slice()]);
        packed.extend_from_slice(&((MAX_OP_BYTES as u32) + 1).to_be_bytes());
        packed.extend_from_slice(&[0u8; 16]); // irrelevant trailing junk
        let frames = unpack_frames(&packed);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn unpack_keeps_earlier_frames_on_truncated_trailer() {
        let a = sample(vec![1]).encode().unwrap();
        let b = sample(vec![2]).encode().unwrap();
        let mut packed = pack_frames([a.as_slice(), b.as_slice()]);
        packed.truncate(packed.len() - 3); // truncate mid-second-frame
        let frames = unpack_frames(&packed);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], a.as_slice());
    }
}
