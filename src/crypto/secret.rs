//! Wraps the 32-byte group secret for a `MemberInvite` payload.
//!
//! The inviter generates an ephemeral X25519 key, performs ECDH against the
//! invitee's long-term X25519 public key, stretches the shared point through
//! HKDF-SHA256, and seals the group secret with that key under
//! XChaCha20-Poly1305. The ephemeral public key travels alongside the
//! ciphertext and nonce so the invitee can redo the ECDH on their side.
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::aead::{decrypt_message, encrypt_message, AeadError};

#[derive(Error, Debug)]
pub enum SecretWrapError {
    #[error(transparent)]
    Aead(#[from] AeadError),
    #[error("malformed wrapped secret: {0}")]
    Malformed(&'static str),
}

const HKDF_INFO: &[u8] = b"lanternfly-group-secret-wrap-v1";
const EPHEMERAL_PUB_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Wire layout of a wrapped group secret: `ephemeral_pub:32 | nonce:24 | ciphertext`.
pub struct WrappedSecret(pub Vec<u8>);

fn derive_aead_key(shared_secret: &x25519_dalek::SharedSecret) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Seal `group_secret` so only the holder of `invitee_x25519_pub`'s matching
/// private key can recover it.
pub fn wrap_group_secret(
    group_secret: &[u8; 32],
    invitee_x25519_pub: &[u8; 32],
) -> Result<WrappedSecret, SecretWrapError> {
    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*invitee_x25519_pub));
    let key = derive_aead_key(&shared);

    let (ciphertext, nonce) = encrypt_message(group_secret, &key)?;

    let mut out = Vec::with_capacity(EPHEMERAL_PUB_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(WrappedSecret(out))
}

/// Recover a group secret wrapped by `wrap_group_secret`, using the
/// invitee's long-term X25519 private key.
pub fn unwrap_group_secret(
    wrapped: &[u8],
    invitee_x25519_priv: &StaticSecret,
) -> Result<[u8; 32], SecretWrapError> {
    if wrapped.len() < EPHEMERAL_PUB_LEN + NONCE_LEN {
        return Err(SecretWrapError::Malformed("wrapped secret too short"));
    }
    let (ephemeral_pub_bytes, rest) = wrapped.split_at(EPHEMERAL_PUB_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(ephemeral_pub_bytes);
    let mut nonce = [0u8; 24];
    nonce.copy_from_slice(nonce_bytes);

    let shared = invitee_x25519_priv.diffie_hellman(&PublicKey::from(ephemeral_pub));
    let key = derive_aead_key(&shared);

    let plaintext = decrypt_message(ciphertext, &key, &nonce)?;
    if plaintext.len() != 32 {
        return Err(SecretWrapError::Malformed("unwrapped secret is not 32 bytes"));
    }
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&plaintext);
    Ok(secret)
}
