//! PIN-protected storage for the completion API key.
//!
//! The key is encrypted with ChaCha20Poly1305 under a key derived from the
//! user's PIN with Argon2id and a per-record salt. Only the encrypted
//! [`KeyRecord`] is ever written to disk.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::store::{crypto, db, KdfParams, KeyRecord, Store};

#[derive(Clone)]
pub struct Vault {
    store: Store,
    kdf: KdfParams,
}

impl Vault {
    pub fn new(store: Store, kdf: KdfParams) -> Self {
        Self { store, kdf }
    }

    /// Whether an encrypted key is stored.
    pub fn has_key(&self) -> Result<bool> {
        Ok(self.store.has_key_record()?)
    }

    /// Encrypt `secret` under `pin` and replace any stored record.
    pub async fn encrypt_and_store(&self, secret: &str, pin: &str) -> Result<()> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("API key must not be empty".into()));
        }
        if pin.is_empty() {
            return Err(Error::PinRequired);
        }

        let secret = Zeroizing::new(secret.to_owned());
        let pin = Zeroizing::new(pin.to_owned());
        let store = self.store.clone();
        let kdf = self.kdf;

        run_blocking(move || {
            let salt = crypto::generate_salt();
            let key = crypto::derive_key(&pin, &salt, kdf)
                .map_err(|e| Error::Internal(format!("{e:#}")))?;
            let (ciphertext, nonce) = crypto::encrypt(&key, secret.as_bytes())
                .map_err(|e| Error::Internal(format!("{e:#}")))?;

            let record = KeyRecord {
                salt,
                nonce,
                kdf,
                ciphertext,
                created_at: now(),
            };
            store.put_key_record(&record)?;
            Ok(())
        })
        .await?;

        info!("API key encrypted and stored");
        Ok(())
    }

    /// Decrypt the stored key with `pin`.
    ///
    /// A wrong PIN and a damaged record both yield
    /// [`Error::InvalidCredential`].
    pub async fn decrypt_stored(&self, pin: &str) -> Result<Zeroizing<String>> {
        if pin.is_empty() {
            return Err(Error::PinRequired);
        }

        let pin = Zeroizing::new(pin.to_owned());
        let store = self.store.clone();

        let result = run_blocking(move || {
            let bytes = store.get_key_record_bytes()?.ok_or(Error::NotFound)?;
            let record = db::decode_key_record(&bytes).map_err(|_| Error::InvalidCredential)?;

            // The record's own cost, not the configured one.
            let key = crypto::derive_key(&pin, &record.salt, record.kdf)
                .map_err(|e| Error::Internal(format!("{e:#}")))?;
            let plaintext = Zeroizing::new(
                crypto::decrypt(&key, &record.ciphertext, &record.nonce)
                    .map_err(|_| Error::InvalidCredential)?,
            );
            let secret = std::str::from_utf8(&plaintext).map_err(|_| Error::InvalidCredential)?;
            Ok(Zeroizing::new(secret.to_owned()))
        })
        .await;

        match &result {
            Ok(_) => debug!("API key decrypted"),
            Err(Error::InvalidCredential) => info!("API key decryption rejected"),
            Err(_) => {}
        }
        result
    }

    /// Remove the stored record. Clearing an empty vault is not an error.
    pub async fn clear(&self) -> Result<()> {
        let store = self.store.clone();
        let existed = run_blocking(move || Ok(store.delete_key_record()?)).await?;
        if existed {
            info!("stored API key cleared");
        }
        Ok(())
    }
}

/// Run KDF, cipher and storage work on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("vault task failed: {e}")))?
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_vault() -> (Vault, Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let vault = Vault::new(store.clone(), crypto::test_params());
        (vault, store, dir)
    }

    fn stored_record(store: &Store) -> KeyRecord {
        let bytes = store.get_key_record_bytes().unwrap().unwrap();
        db::decode_key_record(&bytes).unwrap()
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_returns_secret() {
        let (vault, _store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();
        let secret = vault.decrypt_stored("4242").await.unwrap();
        assert_eq!(secret.as_str(), "sk-abc");
    }

    #[tokio::test]
    async fn wrong_pin_is_invalid_credential() {
        let (vault, _store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();
        let err = vault.decrypt_stored("0000").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential));
    }

    #[tokio::test]
    async fn empty_vault_is_not_found() {
        let (vault, _store, _dir) = make_vault();
        let err = vault.decrypt_stored("4242").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn empty_pin_is_rejected_before_lookup() {
        let (vault, _store, _dir) = make_vault();
        // Empty vault: a lookup would have produced NotFound.
        let err = vault.decrypt_stored("").await.unwrap_err();
        assert!(matches!(err, Error::PinRequired));

        let err = vault.encrypt_and_store("sk-abc", "").await.unwrap_err();
        assert!(matches!(err, Error::PinRequired));
    }

    #[tokio::test]
    async fn empty_secret_is_rejected() {
        let (vault, _store, _dir) = make_vault();
        let err = vault.encrypt_and_store("", "4242").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!vault.has_key().unwrap());
    }

    #[tokio::test]
    async fn clear_then_decrypt_is_not_found() {
        let (vault, _store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();
        vault.clear().await.unwrap();
        assert!(!vault.has_key().unwrap());
        let err = vault.decrypt_stored("4242").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (vault, _store, _dir) = make_vault();
        vault.clear().await.unwrap();
        vault.clear().await.unwrap();
    }

    #[tokio::test]
    async fn each_encryption_uses_fresh_nonce_and_salt() {
        let (vault, store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();
        let first = stored_record(&store);
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();
        let second = stored_record(&store);

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[tokio::test]
    async fn corrupted_record_looks_like_wrong_pin() {
        let (vault, store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();

        let mut record = stored_record(&store);
        record.ciphertext[0] ^= 0xff;
        store.put_key_record(&record).unwrap();

        let err = vault.decrypt_stored("4242").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential));
    }

    #[tokio::test]
    async fn changed_kdf_cost_still_decrypts_existing_record() {
        let (vault, store, _dir) = make_vault();
        vault.encrypt_and_store("sk-abc", "4242").await.unwrap();

        let costlier = KdfParams {
            passes: 2,
            ..crypto::test_params()
        };
        let reconfigured = Vault::new(store.clone(), costlier);
        let secret = reconfigured.decrypt_stored("4242").await.unwrap();
        assert_eq!(secret.as_str(), "sk-abc");
        assert_eq!(stored_record(&store).kdf, crypto::test_params());

        // Saving again picks up the new cost.
        reconfigured.encrypt_and_store("sk-abc", "4242").await.unwrap();
        assert_eq!(stored_record(&store).kdf, costlier);
    }

    #[tokio::test]
    async fn saving_again_replaces_previous_key() {
        let (vault, _store, _dir) = make_vault();
        vault.encrypt_and_store("sk-old", "1111").await.unwrap();
        vault.encrypt_and_store("sk-new", "2222").await.unwrap();

        assert!(matches!(
            vault.decrypt_stored("1111").await.unwrap_err(),
            Error::InvalidCredential
        ));
        assert_eq!(vault.decrypt_stored("2222").await.unwrap().as_str(), "sk-new");
    }
}
