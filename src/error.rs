//! Sampling error taxonomy
//!
//! Every failure is local to one instrument's task. The coordinator logs it
//! and moves on; nothing here aborts a whole run except `NoInstruments`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    /// Connection reset, DNS failure, broken body stream.
    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// HTTP 429. `retry_after` comes from the `Retry-After` header when present.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    /// Missing fields, unparsable numbers, non-zero exchange codes.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid sampling window: duration {duration_hours}h must be positive")]
    InvalidWindow { duration_hours: f64 },

    #[error("gave up on {symbol} after {attempts} attempts: {last}")]
    RetriesExhausted {
        symbol: String,
        attempts: u32,
        #[source]
        last: Box<SamplerError>,
    },

    #[error("cache i/o: {0}")]
    Cache(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("instrument discovery returned no symbols")]
    NoInstruments,

    #[error("worker pool closed")]
    PoolClosed,
}

impl SamplerError {
    /// Whether the same page request may be retried after a backoff.
    ///
    /// Rate limiting is handled separately and is not covered here.
    pub fn is_retryable(&self) -> bool {
        match self {
            SamplerError::Network(_) | SamplerError::Timeout => true,
            SamplerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type SamplerResult<T> = std::result::Result<T, SamplerError>;
