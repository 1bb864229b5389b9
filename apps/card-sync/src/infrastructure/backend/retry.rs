//! `Retry-After` header parsing and status classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::SyncError;

/// Extracts retry hints from response headers.
pub struct RetryAfterExtractor;

impl RetryAfterExtractor {
    /// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
    #[must_use]
    pub fn parse(value: &str) -> Option<Duration> {
        Self::parse_at(value, Utc::now())
    }

    /// Parse relative to `now`; dates in the past yield zero.
    #[must_use]
    pub fn parse_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }

        let date = DateTime::parse_from_rfc2822(value).ok()?;
        let delta = date.with_timezone(&Utc) - now;
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }

    /// Hint from `headers`, if present and parseable.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

/// Map a non-success status to the sync error taxonomy.
#[must_use]
pub fn status_error(status: StatusCode, headers: &HeaderMap) -> SyncError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            retry_after: RetryAfterExtractor::from_headers(headers),
        },
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            SyncError::BackendUnavailable {
                status: status.as_u16(),
                retry_after: RetryAfterExtractor::from_headers(headers),
            }
        }
        other => SyncError::Http {
            status: other.as_u16(),
        },
    }
}
