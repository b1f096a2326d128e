use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors from the store client and manifest layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("manifest not found for {station} on {date}")]
    ManifestNotFound { station: String, date: NaiveDate },

    #[error("malformed manifest: {0}")]
    ManifestMalformed(String),

    #[error("chunk not found under any key variant: {key}")]
    ChunkNotFound { key: String },

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retries exhausted for {url}")]
    RetriesExhausted { url: String },

    #[error("malformed progressive view: {0}")]
    ViewMalformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient failures are retried with backoff; the rest fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Errors from fetch planning. These are fatal to the request (unlike
/// missing chunks, which degrade to silence).
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("empty or inverted request window ({start} .. {end})")]
    EmptyWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("no day manifest available for {station} anywhere in the window")]
    NoManifests { station: String },
}
