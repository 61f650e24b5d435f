use thiserror::Error;

/// Errors surfaced by vault, network and history operations.
///
/// No variant ever carries the API key or the PIN.
#[derive(Debug, Error)]
pub enum Error {
    /// No encrypted API key is stored.
    #[error("no stored API key")]
    NotFound,

    /// An empty PIN was supplied.
    #[error("PIN required")]
    PinRequired,

    /// Decryption failed: wrong PIN or corrupted record.
    #[error("invalid PIN or corrupted key record")]
    InvalidCredential,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure that persisted through every retry attempt.
    #[error("network error: {0}")]
    TransientNetwork(#[source] reqwest::Error),

    /// Non-2xx, non-retryable response from the completion API.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Transcript could not be fetched or parsed.
    #[error("{0}")]
    NotAvailable(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
