//! # Lanternfly Protocol
//!
//! **A signed, operation-based CRDT engine for private group messaging over
//! anonymous transports.**
//!
//! Lanternfly gives every device in a group an independent, append-only log
//! of signed operations — invite, accept, remove, post, edit, delete, react,
//! set metadata — and replays that log into a converged view of the group.
//! Any two replicas that have seen the same set of ops converge to the same
//! state regardless of the order they applied them in, with no central
//! server required to arbitrate conflicts.
//!
//! ## Quick Start
//!
//! ```rust
//! use lanternfly_protocol::group_manager::{GroupManager, Identity};
//! use lanternfly_protocol::store::InMemoryOpLogStore;
//! use lanternfly_protocol::transport::Transport;
//!
//! struct NullTransport;
//! impl Transport for NullTransport {
//!     fn send(&mut self, _peer_address: &str, _payload: &[u8]) -> bool {
//!         true
//!     }
//! }
//!
//! let identity = Identity::generate();
//! let mut manager = GroupManager::new(identity, InMemoryOpLogStore::new());
//! let mut transport = NullTransport;
//! let (group_id, _create_op) = manager
//!     .create_group("friends".to_string(), &mut transport)
//!     .unwrap();
//! assert!(manager.group_state(&group_id).is_some());
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | Ed25519 signing, X25519 secret wrapping, XChaCha20-Poly1305 AEAD |
//! | [`crdt`] | Operation envelope, membership/message/metadata CRDTs, the state engine |
//! | [`store`] | Durable op log contract (`OpLogStore`) plus an in-memory reference impl |
//! | [`sync`] | Pull-based anti-entropy wire protocol (broadcast, sync request/chunk) |
//! | [`transport`] | Transport-agnostic send/classify adapter |
//! | [`group_manager`] | Orchestration: identity, op creation, the commit pipeline |
//! | [`config`] | Runtime-tunable sync pacing knobs |
//! | [`error`] | Crate-wide unified error type |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `std` | Yes | Standard library support |
//! | `groups` | Yes | CRDT group messaging (adds `ciborium` for CBOR encoding) |
//! | `native` | Yes | Tokio-backed background sync loop |

// Crate-level lint configuration — suppress stylistic warnings that don't affect correctness.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity,
    clippy::inherent_to_string,
    clippy::manual_strip,
    clippy::needless_range_loop
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Cryptographic primitives: Ed25519 signing, X25519 group-secret wrapping,
/// XChaCha20-Poly1305 message encryption, CSPRNG helpers.
pub mod crypto;

/// CRDT-based group messaging — conflict-free replicated data types for
/// invite, message, edit, delete, react, and metadata operations.
#[cfg(feature = "groups")]
pub mod crdt;

/// Durable op log store contract and an in-memory reference implementation.
#[cfg(feature = "groups")]
pub mod store;

/// Pull-based anti-entropy sync protocol and invite bootstrap.
#[cfg(feature = "groups")]
pub mod sync;

/// Transport-agnostic send/classify adapter consumed by the group manager.
#[cfg(feature = "groups")]
pub mod transport;

/// Orchestration layer: local identity, op creation, and the
/// fetch-lamport → sign → persist → apply → broadcast pipeline.
#[cfg(feature = "groups")]
pub mod group_manager;

/// Runtime-tunable sync pacing configuration.
#[cfg(feature = "groups")]
pub mod config;

/// Crate-wide unified error type.
#[cfg(feature = "groups")]
pub mod error;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use crypto::{
    decrypt_message, encrypt_message, generate_keypair, sign_data, verify_signature,
};

#[cfg(feature = "groups")]
pub use error::CrdtError;

#[cfg(feature = "groups")]
pub use group_manager::{GroupManager, Identity};

// ── Library metadata ────────────────────────────────────────────────────────

/// Lanternfly Protocol version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }

    #[test]
    fn keypair_generation() {
        let (pk, _sk) = generate_keypair();
        assert_eq!(pk.len(), 32);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [0x42u8; 32];
        let plaintext = b"Hello, Lanternfly!";
        let (ciphertext, nonce) = encrypt_message(plaintext, &key).expect("encrypt");
        let decrypted = decrypt_message(&ciphertext, &key, &nonce).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }
}
