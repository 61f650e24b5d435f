//! Transcript lookup through youtubetotranscript.com.

use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0";
const TITLE_PREFIX: &str = "Transcript of ";
const TITLE_SUFFIX: &str = " - YouTubeToTranscript.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub transcript: String,
    pub title: String,
}

/// Extract the video id from a `youtu.be/<id>` or `youtube.com/watch?v=<id>` URL.
pub fn parse_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    let id = if host.contains("youtu.be") {
        parsed.path().trim_start_matches('/').to_owned()
    } else if host.contains("youtube.com") {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())?
    } else {
        return None;
    };

    (!id.is_empty()).then_some(id)
}

#[derive(Clone)]
pub struct TranscriptClient {
    client: Client,
    base_url: String,
}

impl TranscriptClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Internal(format!("build reqwest client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn fetch(&self, video_id: &str) -> Result<Transcript> {
        let url = format!("{}/transcript", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("v", video_id)])
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "transcript request failed");
                Error::NotAvailable("Transcript not available".into())
            })?;

        if !resp.status().is_success() {
            debug!(status = %resp.status(), "transcript source rejected request");
            return Err(Error::NotAvailable("Transcript not available".into()));
        }

        let html = resp
            .text()
            .await
            .map_err(|_| Error::NotAvailable("Transcript not available".into()))?;
        parse_transcript_page(&html)
    }
}

/// Join every `span[data-start]` segment and pull the video title out of
/// the page `<title>`.
pub fn parse_transcript_page(html: &str) -> Result<Transcript> {
    let doc = Html::parse_document(html);
    let segment_sel = selector("span[data-start]")?;
    let title_sel = selector("title")?;

    let segments: Vec<String> = doc
        .select(&segment_sel)
        .map(|s| s.text().collect::<String>().trim().to_owned())
        .collect();
    if segments.is_empty() {
        return Err(Error::NotAvailable("Transcript not found".into()));
    }

    let title = doc
        .select(&title_sel)
        .next()
        .map(|t| {
            let raw = t.text().collect::<String>();
            let raw = raw.trim();
            raw.strip_prefix(TITLE_PREFIX)
                .and_then(|rest| rest.strip_suffix(TITLE_SUFFIX))
                .filter(|t| !t.is_empty())
                .unwrap_or(raw)
                .to_owned()
        })
        .unwrap_or_default();

    Ok(Transcript {
        transcript: segments.join(" "),
        title,
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Internal(format!("bad selector {css}: {e}")))
}
