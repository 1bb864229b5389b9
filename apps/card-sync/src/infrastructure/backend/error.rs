//! Card backend adapter errors.

use thiserror::Error;

use crate::error::SyncError;

/// Errors raised inside the HTTP adapter before they are mapped to [`SyncError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendClientError {
    /// Base URL could not be parsed.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request or body read timed out.
    #[error("request timed out")]
    Timeout,

    /// Body was not the expected JSON.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),
}

impl From<reqwest::Error> for BackendClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::JsonParse(err.to_string())
        } else if err.is_builder() {
            Self::Client(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse(err.to_string())
    }
}

impl From<BackendClientError> for SyncError {
    fn from(err: BackendClientError) -> Self {
        match err {
            BackendClientError::InvalidUrl(msg) => Self::InvalidInput(msg),
            BackendClientError::Client(msg) | BackendClientError::Network(msg) => {
                Self::Network(msg)
            }
            BackendClientError::Timeout => Self::Timeout,
            BackendClientError::JsonParse(msg) => Self::Decode(msg),
        }
    }
}
