use anyhow::Result;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// 32-byte encryption key derived from the PIN via Argon2id.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Argon2id cost parameters. Stored with each key record so that a later
/// change of the configured cost does not orphan an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub passes: u32,
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MiB
            passes: 3,
            lanes: 1,
        }
    }
}

impl KdfParams {
    /// Lowest cost accepted from configuration (19 MiB, 2 passes).
    pub const MINIMUM: KdfParams = KdfParams {
        memory_kib: 19 * 1024,
        passes: 2,
        lanes: 1,
    };

    pub fn meets_minimum(&self) -> bool {
        self.memory_kib >= Self::MINIMUM.memory_kib
            && self.passes >= Self::MINIMUM.passes
            && self.lanes >= Self::MINIMUM.lanes
    }

    fn to_argon2(self) -> Result<Params> {
        Params::new(self.memory_kib, self.passes, self.lanes, Some(32))
            .map_err(|e| anyhow::anyhow!("argon2 params: {e}"))
    }
}

/// Derive a 32-byte encryption key from `pin` and `salt` using Argon2id.
pub fn derive_key(pin: &str, salt: &[u8; SALT_LEN], params: KdfParams) -> Result<EncryptionKey> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key = [0u8; 32];
    let derived = argon2
        .hash_password_into(pin.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"));
    if let Err(e) = derived {
        key.zeroize();
        return Err(e);
    }

    Ok(EncryptionKey(key))
}

/// Encrypt `plaintext` with `key` under a fresh random nonce,
/// returning `(ciphertext, nonce)`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encrypt: {e}"))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt and authenticate `ciphertext`. Fails on a wrong key or any
/// tampering with ciphertext or nonce.
pub fn decrypt(
    key: &EncryptionKey,
    ciphertext: &[u8],
    nonce_bytes: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::from(*nonce_bytes);

    let plaintext = cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|e| anyhow::anyhow!("decrypt: {e}"))?;

    Ok(plaintext)
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        passes: 1,
        lanes: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let salt = generate_salt();
        let key = derive_key("4242", &salt, test_params()).unwrap();
        let plaintext = b"sk-live-abc123";
        let (ct, nonce) = encrypt(&key, plaintext).unwrap();
        let pt = decrypt(&key, &ct, &nonce).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn wrong_pin_fails() {
        let salt = generate_salt();
        let key1 = derive_key("4242", &salt, test_params()).unwrap();
        let key2 = derive_key("0000", &salt, test_params()).unwrap();
        let (ct, nonce) = encrypt(&key1, b"secret").unwrap();
        assert!(decrypt(&key2, &ct, &nonce).is_err());
    }

    #[test]
    fn derivation_is_salted() {
        let key1 = derive_key("4242", &generate_salt(), test_params()).unwrap();
        let key2 = derive_key("4242", &generate_salt(), test_params()).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let salt = generate_salt();
        let key = derive_key("4242", &salt, test_params()).unwrap();
        let (mut ct, nonce) = encrypt(&key, b"secret").unwrap();
        ct[0] ^= 0x01;
        assert!(decrypt(&key, &ct, &nonce).is_err());
    }

    #[test]
    fn minimum_cost_check() {
        assert!(KdfParams::default().meets_minimum());
        assert!(KdfParams::MINIMUM.meets_minimum());
        assert!(!test_params().meets_minimum());
        let weak = KdfParams {
            passes: 1,
            ..KdfParams::MINIMUM
        };
        assert!(!weak.meets_minimum());
    }

    #[test]
    fn rejects_params_below_minimum() {
        let params = KdfParams {
            memory_kib: 1,
            passes: 0,
            lanes: 1,
        };
        assert!(derive_key("4242", &generate_salt(), params).is_err());
    }
}
