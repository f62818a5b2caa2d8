//! XChaCha20-Poly1305 AEAD for message bodies (spec §4.5, §6).
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AeadError {
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed — ciphertext or key is wrong")]
    DecryptFailed,
}

/// Encrypt `plaintext` under the 32-byte group secret with a random 24-byte
/// nonce. Returns `(ciphertext, nonce)`; the nonce must be stored alongside
/// the ciphertext (it is not secret).
pub fn encrypt_message(plaintext: &[u8], key: &[u8; 32]) -> Result<(Vec<u8>, [u8; 24]), AeadError> {
    let nonce = crate::crypto::csprng::random_24();
    let cipher = XChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptFailed)?;
    Ok((ciphertext, nonce))
}

/// Decrypt a ciphertext produced by `encrypt_message` under the same key
/// and nonce. A tampered ciphertext, wrong key, or wrong nonce all surface
/// as `AeadError::DecryptFailed` (spec §7 `CryptoError`: presented as an
/// undecipherable message, never deleted).
pub fn decrypt_message(
    ciphertext: &[u8],
    key: &[u8; 32],
    nonce: &[u8; 24],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| AeadError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [0x11; 32];
        let (ct, nonce) = encrypt_message(b"hello group", &key).unwrap();
        let pt = decrypt_message(&ct, &key, &nonce).unwrap();
        assert_eq!(pt, b"hello group");
    }

    #[test]
    fn wrong_key_fails() {
        let (ct, nonce) = encrypt_message(b"secret", &[0x22; 32]).unwrap();
        let err = decrypt_message(&ct, &[0x33; 32], &nonce).unwrap_err();
        assert!(matches!(err, AeadError::DecryptFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [0x44; 32];
        let (mut ct, nonce) = encrypt_message(b"tamper me", &key).unwrap();
        ct[0] ^= 0xFF;
        assert!(decrypt_message(&ct, &key, &nonce).is_err());
    }

    #[test]
    fn nonces_are_random_per_call() {
        let key = [0x55; 32];
        let (_, n1) = encrypt_message(b"a", &key).unwrap();
        let (_, n2) = encrypt_message(b"a", &key).unwrap();
        assert_ne!(n1, n2);
    }
}
