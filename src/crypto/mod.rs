//! Cryptographic primitives consumed by the CRDT engine: Ed25519
//! sign/verify, XChaCha20-Poly1305 AEAD for message bodies and wrapped
//! group secrets, SHA-256 hashing, and a thin CSPRNG helper.
//!
//! Everything outside this module treats these as opaque operations — the
//! engine never reaches into `chacha20poly1305`/`ed25519-dalek` directly.
pub mod aead;
pub mod csprng;
pub mod secret;
pub mod signing;

pub use aead::{decrypt_message, encrypt_message, AeadError};
pub use csprng::{random_16, random_24, random_32};
pub use secret::{unwrap_group_secret, wrap_group_secret, SecretWrapError};
pub use signing::{derive_public_key, generate_keypair, sign_data, verify_signature, SigningError};
