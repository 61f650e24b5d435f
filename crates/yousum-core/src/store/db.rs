use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use super::crypto::{KdfParams, NONCE_LEN, SALT_LEN};
use super::model::KeyRecord;

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
pub(crate) const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys.store");
pub(crate) const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");
/// Held platform-authenticator credential ids in the passkey era. Dropped by
/// the v3 migration.
const LEGACY_WEBAUTHN: TableDefinition<&str, &[u8]> = TableDefinition::new("webauthn");

const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const SCHEMA_VERSION: u64 = 3;

const API_KEY_SLOT: &str = "apiKey";
const HISTORY_SLOT: &str = "yousum-history";

/// Marker bytes prefixed to encoded key records. v1 records predate the
/// stored KDF cost and were always derived with the default cost.
const RECORD_V1_MARKER: u8 = 0x01;
const RECORD_V2_MARKER: u8 = 0x02;

#[derive(serde::Deserialize)]
struct KeyRecordV1 {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    created_at: i64,
}

/// Thread-safe handle to the redb database holding the key record and the
/// history list.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;
        migrate(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn schema_version(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        let version = meta.get(SCHEMA_VERSION_KEY)?.map(|g| g.value()).unwrap_or(0);
        Ok(version)
    }

    // ── Key record slot ───────────────────────────────────────────────────

    /// Insert or overwrite the single key record.
    pub fn put_key_record(&self, record: &KeyRecord) -> Result<()> {
        let bytes = encode_key_record(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KEYS)?;
            table.insert(API_KEY_SLOT, bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!("stored key record");
        Ok(())
    }

    /// Raw encoded key record, if one exists. Decoding is left to the caller
    /// so that a corrupt record can be reported as a credential failure.
    pub fn get_key_record_bytes(&self) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYS)?;
        let bytes = table.get(API_KEY_SLOT)?.map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    pub fn has_key_record(&self) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYS)?;
        let exists = table.get(API_KEY_SLOT)?.is_some();
        Ok(exists)
    }

    /// Delete the key record. Returns true if it existed.
    pub fn delete_key_record(&self) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(KEYS)?;
            let existed = table.remove(API_KEY_SLOT)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    // ── History list ──────────────────────────────────────────────────────

    /// The serialized history array, if it has ever been written.
    pub fn read_history(&self) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HISTORY)?;
        let bytes = table.get(HISTORY_SLOT)?.map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    /// Replace the serialized history array in one transaction.
    pub fn write_history(&self, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HISTORY)?;
            table.insert(HISTORY_SLOT, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Apply every schema step above the stored version in a single write
/// transaction. Each step only creates or drops its own tables.
fn migrate(db: &Database) -> Result<()> {
    let write_txn = db.begin_write()?;
    let current = {
        let meta = write_txn.open_table(META)?;
        let version = meta.get(SCHEMA_VERSION_KEY)?.map(|g| g.value()).unwrap_or(0);
        version
    };

    if current >= SCHEMA_VERSION {
        write_txn.abort()?;
        return Ok(());
    }

    if current < 1 {
        write_txn.open_table(KEYS)?;
    }
    if current < 2 {
        write_txn.open_table(HISTORY)?;
    }
    if current < 3 {
        let dropped = write_txn
            .delete_table(LEGACY_WEBAUTHN)
            .context("drop legacy webauthn table")?;
        if dropped {
            info!("removed legacy passkey credential table");
        }
    }

    {
        let mut meta = write_txn.open_table(META)?;
        meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
    }
    write_txn.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "migrated database schema");
    Ok(())
}

/// Encode a KeyRecord as `[RECORD_V2_MARKER] + bincode(record)`.
pub fn encode_key_record(record: &KeyRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V2_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_key_record(bytes: &[u8]) -> Result<KeyRecord> {
    match bytes.split_first() {
        Some((&RECORD_V2_MARKER, payload)) if !payload.is_empty() => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode")?;
            Ok(record)
        }
        Some((&RECORD_V1_MARKER, payload)) if !payload.is_empty() => {
            let (old, _): (KeyRecordV1, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode v1")?;
            Ok(KeyRecord {
                salt: old.salt,
                nonce: old.nonce,
                kdf: KdfParams::default(),
                ciphertext: old.ciphertext,
                created_at: old.created_at,
            })
        }
        Some(_) => anyhow::bail!("unknown key record format"),
        None => anyhow::bail!("empty key record"),
    }
}
