//! Synchronization error taxonomy.
//!
//! | Kind | Retryable | Handling |
//! |------|-----------|----------|
//! | `invalid_input` | no | Resolved locally, never reaches the network |
//! | `not_found` | no | Terminal not-found card |
//! | `rate_limited` | yes | One retry honoring `Retry-After` |
//! | `backend_unavailable` | yes | One retry honoring `Retry-After` |
//! | `network_error` / `network_timeout` | no | Surfaced to the caller |
//! | `stream_protocol_error` | no | Stream falls back to polling |
//!
//! Enrichment pending/failed are not errors; they travel inside the view model.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by fetches and the event stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Malformed instrument symbol.
    #[error("invalid ticker: {0:?}")]
    InvalidInput(String),

    /// Backend confirmed the instrument does not exist.
    #[error("ticker not found: {0}")]
    NotFound(String),

    /// HTTP 429.
    #[error("rate limited by backend")]
    RateLimited {
        /// Server-supplied retry delay.
        retry_after: Option<Duration>,
    },

    /// HTTP 503 (and other gateway-class 5xx).
    #[error("backend unavailable (HTTP {status})")]
    BackendUnavailable {
        /// HTTP status code.
        status: u16,
        /// Server-supplied retry delay.
        retry_after: Option<Duration>,
    },

    /// Any other non-success HTTP status.
    #[error("backend returned HTTP {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Event stream violated the protocol (wrong content type, fatal frame).
    #[error("stream protocol error: {0}")]
    StreamProtocol(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation was cancelled by teardown.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the coordinator should retry once.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::BackendUnavailable { status: 503, .. }
        )
    }

    /// Server-supplied retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::BackendUnavailable { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Whether the stream should give up on reconnecting.
    #[must_use]
    pub const fn is_fatal_for_stream(&self) -> bool {
        matches!(
            self,
            Self::StreamProtocol(_) | Self::InvalidInput(_) | Self::NotFound(_)
        ) || matches!(self, Self::Http { status } if *status >= 400 && *status < 500)
    }

    /// Stable snake_case name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Http { .. } => "http_error",
            Self::Network(_) => "network_error",
            Self::Timeout => "network_timeout",
            Self::StreamProtocol(_) => "stream_protocol_error",
            Self::Decode(_) => "decode_error",
            Self::Cancelled => "cancelled",
        }
    }
}
