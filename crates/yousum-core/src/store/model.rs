use serde::{Deserialize, Deserializer, Serialize};
use zeroize::ZeroizeOnDrop;

use super::crypto::{KdfParams, NONCE_LEN, SALT_LEN};

/// The encrypted API key. Stored in redb as bincode-encoded bytes.
/// `ciphertext` is ChaCha20Poly1305 output (ciphertext + tag) under a key
/// derived from the user's PIN and `salt`.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct KeyRecord {
    /// Per-record random salt for key derivation.
    pub salt: [u8; SALT_LEN],
    /// Per-encryption random 12-byte nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Argon2id cost the key was derived with.
    #[zeroize(skip)]
    pub kdf: KdfParams,
    pub ciphertext: Vec<u8>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
}

/// Timestamp given to history entries persisted without one.
pub const FALLBACK_CREATED_AT: &str = "2025-08-01T00:00:00.000Z";

/// One completed summarization. Serialized as JSON with the same field
/// names used by exported history files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel: String,
    /// Markdown summary text.
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transcript: String,
    /// ISO-8601 timestamp.
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: String,
    /// Fields this version does not know about, kept so that imports and
    /// exports do not lose data.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HistoryEntry {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ..Default::default()
        }
    }
}

/// Accepts any JSON value for a text field: `null` becomes empty, strings
/// are kept, anything else is stored as its JSON text.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// Result of merging imported entries into the history list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub added: usize,
    pub total: usize,
}
