use std::path::PathBuf;

use tracing::info;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::dirs::{resolve_data_dir, DB_FILE};
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::store::{HistoryEntry, Store};
use crate::transcript::{parse_video_id, TranscriptClient};
use crate::vault::Vault;

/// Everything a front end needs, opened from one [`Config`].
#[derive(Clone)]
pub struct Yousum {
    data_dir: PathBuf,
    vault: Vault,
    history: HistoryStore,
    transcripts: TranscriptClient,
    completion: CompletionClient,
}

impl Yousum {
    pub fn open(cfg: &Config) -> Result<Self> {
        let data_dir = resolve_data_dir(cfg.data_dir.as_deref())?;
        let db_path = data_dir.join(DB_FILE);
        let store = Store::open(&db_path)?;
        info!(path = %db_path.display(), "opened yousum database");

        Ok(Self {
            vault: Vault::new(store.clone(), cfg.kdf),
            history: HistoryStore::new(store),
            transcripts: TranscriptClient::new(cfg.transcript_url.clone())?,
            completion: CompletionClient::from_config(cfg)?,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn completion(&self) -> &CompletionClient {
        &self.completion
    }

    /// Fetch the transcript for `url`, summarize it and record the result
    /// at the front of the history.
    pub async fn summarize_url(&self, url: &str, api_key: &str) -> Result<HistoryEntry> {
        let url = url.trim();
        let video_id =
            parse_video_id(url).ok_or_else(|| Error::InvalidInput("Invalid YouTube URL".into()))?;

        let transcript = self.transcripts.fetch(&video_id).await?;
        let summary = self
            .completion
            .summarize(&transcript.transcript, api_key)
            .await?;

        let mut entry = HistoryEntry::new(url, transcript.title);
        entry.summary = summary;
        entry.transcript = transcript.transcript;
        self.history.add(entry.clone());
        info!(video_id = %video_id, "summarized video");
        Ok(entry)
    }

    /// Answer `question` from the transcript of history entry `index`.
    pub async fn ask(&self, index: usize, question: &str, api_key: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question must not be empty".into()));
        }
        let entry = self.history.get(index).ok_or(Error::NotFound)?;
        if entry.transcript.is_empty() {
            return Err(Error::InvalidInput(
                "history entry has no transcript".into(),
            ));
        }
        self.completion
            .ask(&entry.transcript, question, api_key)
            .await
    }

    /// Digest of the newest `limit` history entries.
    pub async fn news(&self, limit: usize, api_key: &str) -> Result<String> {
        let entries: Vec<HistoryEntry> = self.history.load().into_iter().take(limit).collect();
        if entries.is_empty() {
            return Err(Error::InvalidInput("history is empty".into()));
        }
        self.completion.summarize_news(&entries, api_key).await
    }
}
