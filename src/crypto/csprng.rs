//! CSPRNG helpers — thin wrappers so call sites never touch `OsRng` directly.
use rand_core::RngCore;

pub fn random_16() -> [u8; 16] {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

pub fn random_24() -> [u8; 24] {
    let mut buf = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

pub fn random_32() -> [u8; 32] {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_values_are_not_all_zero() {
        assert_ne!(random_16(), [0u8; 16]);
        assert_ne!(random_24(), [0u8; 24]);
        assert_ne!(random_32(), [0u8; 32]);
    }

    #[test]
    fn successive_calls_differ() {
        assert_ne!(random_32(), random_32());
    }
}
