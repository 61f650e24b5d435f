use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::RequestClient;
use crate::store::HistoryEntry;

const SUMMARY_PROMPT: &str = include_str!("../prompts/summary.md");
const QA_PROMPT: &str = include_str!("../prompts/qa.md");
const NEWS_PROMPT: &str = include_str!("../prompts/news.md");

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// ── Prompts ──────────────────────────────────────────────────────────────────

/// System prompts for the three request kinds.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub summary: String,
    pub qa: String,
    pub news: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            summary: SUMMARY_PROMPT.into(),
            qa: QA_PROMPT.into(),
            news: NEWS_PROMPT.into(),
        }
    }
}

impl Prompts {
    /// Built-in prompts, each replaced by `summary.md`, `qa.md` or `news.md`
    /// from `dir` when that file exists.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut prompts = Self::default();
        let Some(dir) = dir else {
            return Ok(prompts);
        };
        for (file, slot) in [
            ("summary.md", &mut prompts.summary),
            ("qa.md", &mut prompts.qa),
            ("news.md", &mut prompts.news),
        ] {
            let path = dir.join(file);
            if path.is_file() {
                *slot = std::fs::read_to_string(&path)?;
                debug!(path = %path.display(), "loaded prompt override");
            }
        }
        Ok(prompts)
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Chat-completion client for summaries, transcript Q&A and news digests.
#[derive(Clone)]
pub struct CompletionClient {
    http: RequestClient,
    endpoint: String,
    model: String,
    max_completion_tokens: u32,
    prompts: Prompts,
}

impl CompletionClient {
    pub fn new(
        http: RequestClient,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        max_completion_tokens: u32,
        prompts: Prompts,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            max_completion_tokens,
            prompts,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            RequestClient::new(cfg.retry)?,
            cfg.api_url.clone(),
            cfg.model.clone(),
            cfg.max_completion_tokens,
            Prompts::load(cfg.prompt_dir.as_deref())?,
        ))
    }

    /// Send `messages` and return the trimmed content of the first choice.
    pub async fn complete(&self, api_key: &str, messages: &[ChatMessage]) -> Result<String> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| Error::InvalidInput("API key contains invalid characters".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_completion_tokens: self.max_completion_tokens,
        };

        let resp = self.http.send(&self.endpoint, &body, &headers).await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            info!(status = status.as_u16(), "completion request rejected");
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_owned())
            .ok_or_else(|| Error::MalformedResponse("response has no message content".into()))
    }

    pub async fn summarize(&self, transcript: &str, api_key: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(self.prompts.summary.as_str()),
            ChatMessage::user(transcript),
        ];
        self.complete(api_key, &messages).await
    }

    pub async fn ask(&self, transcript: &str, question: &str, api_key: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(self.prompts.qa.as_str()),
            ChatMessage::user(transcript),
            ChatMessage::user(question),
        ];
        self.complete(api_key, &messages).await
    }

    /// Digest of several history entries.
    pub async fn summarize_news(&self, entries: &[HistoryEntry], api_key: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(self.prompts.news.as_str()),
            ChatMessage::user(format_news_items(entries)),
        ];
        self.complete(api_key, &messages).await
    }
}

/// `#N | date | title — channel | url` header plus summary per entry,
/// separated by blank lines.
pub fn format_news_items(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(idx, e)| {
            format!(
                "#{} | {} | {} — {} | {}\n{}",
                idx + 1,
                e.created_at,
                e.title,
                e.channel,
                e.url,
                e.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
