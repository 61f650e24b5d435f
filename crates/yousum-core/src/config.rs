use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::http::RetryPolicy;
use crate::store::KdfParams;

pub const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-120b";
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 8192;
pub const DEFAULT_TRANSCRIPT_URL: &str = "https://youtubetotranscript.com";
/// Inactivity window after which the decrypted key is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub api_url: String,
    pub model: String,
    pub max_completion_tokens: u32,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
    pub transcript_url: String,
    /// Directory with `summary.md`, `qa.md`, `news.md` prompt overrides.
    pub prompt_dir: Option<PathBuf>,
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        let retry_defaults = RetryPolicy::default();
        Self {
            data_dir: std::env::var("YOUSUM_DATA_DIR").ok().map(PathBuf::from),
            api_url: std::env::var("YOUSUM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into()),
            model: std::env::var("YOUSUM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            max_completion_tokens: env_parse("YOUSUM_MAX_TOKENS")
                .unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS),
            retry: RetryPolicy {
                max_attempts: env_parse("YOUSUM_MAX_ATTEMPTS")
                    .unwrap_or(retry_defaults.max_attempts),
                base_delay: env_parse("YOUSUM_RETRY_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.base_delay),
            },
            idle_timeout: std::env::var("YOUSUM_IDLE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse::<humantime::Duration>().ok())
                .map(Into::into)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            transcript_url: std::env::var("YOUSUM_TRANSCRIPT_URL")
                .unwrap_or_else(|_| DEFAULT_TRANSCRIPT_URL.into()),
            prompt_dir: std::env::var("YOUSUM_PROMPT_DIR").ok().map(PathBuf::from),
            kdf: configured_kdf(
                env_parse("YOUSUM_KDF_MEMORY_KIB"),
                env_parse("YOUSUM_KDF_PASSES"),
            ),
        }
    }
}

/// Argon2id cost from optional overrides. A cost below
/// [`KdfParams::MINIMUM`] is ignored in favour of the default.
fn configured_kdf(memory_kib: Option<u32>, passes: Option<u32>) -> KdfParams {
    let defaults = KdfParams::default();
    let requested = KdfParams {
        memory_kib: memory_kib.unwrap_or(defaults.memory_kib),
        passes: passes.unwrap_or(defaults.passes),
        lanes: defaults.lanes,
    };
    if requested.meets_minimum() {
        requested
    } else {
        warn!(
            memory_kib = requested.memory_kib,
            passes = requested.passes,
            "KDF cost below minimum, using defaults"
        );
        defaults
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
