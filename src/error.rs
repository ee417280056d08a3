use std::time::Duration;

use thiserror::Error;

/// Startup configuration problems. Fatal: the process exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no credentials configured")]
    NoCredentials,

    #[error("no targets configured")]
    NoTargets,

    #[error("invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Session creation failed for one credential. Triggers a cooldown.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected: {0}")]
    Rejected(String),

    #[error("session provider unavailable: {0}")]
    Unavailable(String),
}

/// Fetching one target failed during a cycle. Triggers a cooldown.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited,

    #[error("session expired or revoked")]
    SessionExpired,

    #[error("fetch returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// A single content item could not be processed. Skipped, never escalated.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("item has no id")]
    MissingId,

    #[error("ledger unavailable: {0}")]
    Ledger(#[from] StoreError),
}

/// Delivery of one signal failed. Logged and dropped.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("publish cancelled by shutdown")]
    Cancelled,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode store entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Unavailable(err.to_string())
    }
}

impl From<redis::RedisError> for PublishError {
    fn from(err: redis::RedisError) -> Self {
        PublishError::Transport(err.to_string())
    }
}
