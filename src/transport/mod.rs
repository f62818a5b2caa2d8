//! Transport adapter (spec §4.7, §6).
//!
//! The engine is transport-agnostic: it only needs a way to hand raw,
//! already wire-encoded bytes to a peer address and a way to route inbound
//! bytes back to the right sync handler by their leading wire-type byte.
//! What "peer address" means — a Tor onion service, a relay mailbox id, a
//! direct socket — is entirely up to the embedding application.
use crate::sync::{WIRE_TYPE_OP_BROADCAST, WIRE_TYPE_SYNC_CHUNK, WIRE_TYPE_SYNC_REQUEST};

/// Opaque destination handle; transports define their own concrete type
/// and implement `Transport` against it.
pub trait Transport {
    /// Send `payload` (already wire-encoded, including its leading
    /// wire-type byte) to `peer_address`. Returns `true` on a best-effort
    /// send; `false` if the transport knows the send definitely failed.
    /// Delivery is not guaranteed either way — that's what sync rounds are
    /// for.
    fn send(&mut self, peer_address: &str, payload: &[u8]) -> bool;
}

/// Inbound message, classified by its leading wire-type byte.
#[derive(Debug)]
pub enum InboundMessage<'a> {
    OpBroadcast(&'a [u8]),
    SyncRequest(&'a [u8]),
    SyncChunk(&'a [u8]),
    Unknown(u8),
}

/// Classify inbound bytes by their leading wire-type byte without
/// decoding the body — the caller dispatches to `sync::decode_broadcast`,
/// `SyncRequest::decode`, or `SyncChunk::decode` from there.
pub fn classify_inbound(bytes: &[u8]) -> InboundMessage<'_> {
    match bytes.first() {
        Some(&WIRE_TYPE_OP_BROADCAST) => InboundMessage::OpBroadcast(bytes),
        Some(&WIRE_TYPE_SYNC_REQUEST) => InboundMessage::SyncRequest(bytes),
        Some(&WIRE_TYPE_SYNC_CHUNK) => InboundMessage::SyncChunk(bytes),
        Some(&other) => InboundMessage::Unknown(other),
        None => InboundMessage::Unknown(0),
    }
}
