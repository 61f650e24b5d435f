//! Persisted list of past summaries, newest first.
//!
//! Reads and writes never fail the caller: unreadable data loads as an empty
//! list and write failures are logged and dropped. Every write replaces the
//! whole list in a single transaction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::model::FALLBACK_CREATED_AT;
use crate::store::{HistoryEntry, MergeOutcome, Store};

/// Prefix of exported history file names.
pub const EXPORT_PREFIX: &str = "yousum";

#[derive(Clone)]
pub struct HistoryStore {
    store: Store,
}

impl HistoryStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The full list. Any read or parse failure yields an empty list.
    pub fn load(&self) -> Vec<HistoryEntry> {
        match self.try_load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "history unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    fn try_load(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        let Some(bytes) = self.store.read_history()? else {
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(parse_entry).collect())
            .unwrap_or_default())
    }

    pub fn get(&self, index: usize) -> Option<HistoryEntry> {
        self.load().into_iter().nth(index)
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put `entry` at the front of the list.
    pub fn add(&self, entry: HistoryEntry) {
        let mut items = self.load();
        items.insert(0, entry);
        self.persist(&items);
    }

    /// Remove the entry at `index`. Out-of-range indexes are ignored.
    pub fn delete_at(&self, index: usize) {
        let mut items = self.load();
        if index >= items.len() {
            debug!(index, len = items.len(), "history delete out of range");
            return;
        }
        items.remove(index);
        self.persist(&items);
    }

    /// Append candidates whose `url` is non-empty and not yet present.
    ///
    /// Accepts arbitrary JSON: a non-array input, nulls and malformed items
    /// are skipped rather than rejected.
    pub fn merge(&self, entries: &Value) -> MergeOutcome {
        let candidates = match entries.as_array() {
            Some(items) if !items.is_empty() => items,
            _ => {
                return MergeOutcome {
                    added: 0,
                    total: self.len(),
                }
            }
        };

        let mut existing = self.load();
        let mut seen: HashSet<String> = existing.iter().map(|e| e.url.clone()).collect();
        let mut added = 0;

        for entry in candidates.iter().filter_map(parse_entry) {
            if entry.url.is_empty() || !seen.insert(entry.url.clone()) {
                continue;
            }
            existing.push(entry);
            added += 1;
        }

        self.persist(&existing);
        info!(added, total = existing.len(), "merged history entries");
        MergeOutcome {
            added,
            total: existing.len(),
        }
    }

    /// Write the full list as pretty JSON into `dir`, returning the path.
    pub fn export_to(&self, dir: &Path) -> Result<PathBuf> {
        let items = self.load();
        let data = serde_json::to_string_pretty(&items)
            .map_err(|e| Error::Internal(format!("serialize history: {e}")))?;
        let path = dir.join(export_file_name(Utc::now()));
        std::fs::write(&path, data)?;
        info!(path = %path.display(), entries = items.len(), "exported history");
        Ok(path)
    }

    /// Read an exported file and merge it.
    pub fn import_from(&self, path: &Path) -> Result<MergeOutcome> {
        let text = std::fs::read_to_string(path)?;
        self.import_json(&text)
    }

    /// Merge a JSON document, which must be an array.
    pub fn import_json(&self, text: &str) -> Result<MergeOutcome> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        if !value.is_array() {
            return Err(Error::Parse(
                "expected a JSON array of history entries".into(),
            ));
        }
        Ok(self.merge(&value))
    }

    fn persist(&self, items: &[HistoryEntry]) {
        let result = serde_json::to_vec(items)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| self.store.write_history(&bytes));
        if let Err(e) = result {
            warn!(error = %e, "history write failed, storage degraded");
        }
    }
}

/// `yousum-YYYYMMDD-HHMMSS.json` in UTC.
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("{EXPORT_PREFIX}-{}.json", now.format("%Y%m%d-%H%M%S"))
}

fn parse_entry(value: &Value) -> Option<HistoryEntry> {
    if !value.is_object() {
        return None;
    }
    let mut entry: HistoryEntry = serde_json::from_value(value.clone()).ok()?;
    if entry.created_at.is_empty() {
        entry.created_at = FALLBACK_CREATED_AT.into();
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_history() -> (HistoryStore, Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (HistoryStore::new(store.clone()), store, dir)
    }

    fn urls(h: &HistoryStore) -> Vec<String> {
        h.load().into_iter().map(|e| e.url).collect()
    }

    #[test]
    fn empty_store_loads_empty() {
        let (h, _s, _dir) = make_history();
        assert!(h.load().is_empty());
    }

    #[test]
    fn add_prepends() {
        let (h, _s, _dir) = make_history();
        h.add(HistoryEntry::new("https://a", "A"));
        h.add(HistoryEntry::new("https://b", "B"));
        assert_eq!(urls(&h), vec!["https://b", "https://a"]);
    }

    #[test]
    fn merge_dedupes_and_appends() {
        let (h, _s, _dir) = make_history();
        let batch = json!([{"url": "a"}, {"url": "a"}, {"url": "b"}]);
        assert_eq!(h.merge(&batch), MergeOutcome { added: 2, total: 2 });
        assert_eq!(h.merge(&batch), MergeOutcome { added: 0, total: 2 });
        assert_eq!(urls(&h), vec!["a", "b"]);
    }

    #[test]
    fn merge_appends_after_existing_entries() {
        let (h, _s, _dir) = make_history();
        h.add(HistoryEntry::new("https://old", "Old"));
        let outcome = h.merge(&json!([{"url": "https://new"}]));
        assert_eq!(outcome, MergeOutcome { added: 1, total: 2 });
        assert_eq!(urls(&h), vec!["https://old", "https://new"]);
    }

    #[test]
    fn merge_tolerates_malformed_input() {
        let (h, _s, _dir) = make_history();
        h.add(HistoryEntry::new("https://x", "X"));

        assert_eq!(h.merge(&json!({"url": "a"})), MergeOutcome { added: 0, total: 1 });
        assert_eq!(h.merge(&Value::Null), MergeOutcome { added: 0, total: 1 });
        assert_eq!(h.merge(&json!([])), MergeOutcome { added: 0, total: 1 });

        let messy = json!([null, 7, "str", {"title": "no url"}, {"url": ""}, {"url": null}, {"url": "ok"}]);
        assert_eq!(h.merge(&messy), MergeOutcome { added: 1, total: 2 });
    }

    #[test]
    fn merge_keeps_entries_with_non_string_fields() {
        let (h, _s, _dir) = make_history();
        let batch = json!([
            {"url": "https://a", "createdAt": 1754006400000u64},
            {"url": "https://b", "title": 42}
        ]);
        assert_eq!(h.merge(&batch), MergeOutcome { added: 2, total: 2 });

        let items = h.load();
        assert_eq!(items[0].created_at, "1754006400000");
        assert_eq!(items[1].title, "42");
    }

    #[test]
    fn load_keeps_stored_entries_with_non_string_fields() {
        let (h, s, _dir) = make_history();
        s.write_history(br#"[{"url": "https://a", "title": 7, "channel": false}]"#)
            .unwrap();
        assert_eq!(h.len(), 1);

        // A later write must not lose the entry.
        h.add(HistoryEntry::new("https://b", "B"));
        assert_eq!(urls(&h), vec!["https://b", "https://a"]);
        assert_eq!(h.get(1).unwrap().title, "7");
    }

    #[test]
    fn merged_entries_get_default_timestamp() {
        let (h, _s, _dir) = make_history();
        h.merge(&json!([{"url": "a", "title": "T"}]));
        assert_eq!(h.get(0).unwrap().created_at, FALLBACK_CREATED_AT);
    }

    #[test]
    fn delete_at_bounds() {
        let (h, _s, _dir) = make_history();
        h.delete_at(0);
        assert!(h.is_empty());

        h.add(HistoryEntry::new("https://a", "A"));
        h.delete_at(5);
        assert_eq!(h.len(), 1);
        h.delete_at(0);
        assert!(h.is_empty());
    }

    #[test]
    fn corrupt_payload_loads_empty_and_recovers() {
        let (h, s, _dir) = make_history();
        s.write_history(b"{not json").unwrap();
        assert!(h.load().is_empty());

        h.add(HistoryEntry::new("https://a", "A"));
        assert_eq!(urls(&h), vec!["https://a"]);
    }

    #[test]
    fn load_skips_non_objects_and_defaults_timestamp() {
        let (h, s, _dir) = make_history();
        s.write_history(br#"[null, {"url": "https://a", "title": "A"}, 3]"#)
            .unwrap();
        let items = h.load();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].created_at, FALLBACK_CREATED_AT);
    }

    #[test]
    fn import_of_known_url_changes_nothing() {
        let (h, _s, _dir) = make_history();
        h.add(HistoryEntry::new("https://x", "T"));
        h.add(HistoryEntry::new("https://y", "U"));

        let outcome = h.import_json(r#"[{"url": "https://x", "title": "T"}]"#).unwrap();
        assert_eq!(outcome, MergeOutcome { added: 0, total: 2 });
    }

    #[test]
    fn import_rejects_non_array() {
        let (h, _s, _dir) = make_history();
        assert!(matches!(h.import_json(r#"{"url": "a"}"#), Err(Error::Parse(_))));
        assert!(matches!(h.import_json("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn export_then_import_into_fresh_store() {
        let (h, _s, dir) = make_history();
        let mut entry = HistoryEntry::new("https://a", "A");
        entry.summary = "# Summary".into();
        h.add(entry.clone());

        let path = h.export_to(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("yousum-") && name.ends_with(".json"));

        let (other, _s2, _dir2) = make_history();
        let outcome = other.import_from(&path).unwrap();
        assert_eq!(outcome, MergeOutcome { added: 1, total: 1 });
        assert_eq!(other.get(0).unwrap(), entry);
    }

    #[test]
    fn export_name_uses_utc_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 7, 4, 5, 6).unwrap();
        assert_eq!(export_file_name(ts), "yousum-20250307-040506.json");
    }
}
