//! Card backend adapter.
//!
//! HTTP client for the card, enqueue and event stream endpoints.

mod client;
mod error;
mod retry;

pub use client::{API_KEY_HEADER, BackendClientConfig, HttpCardBackend, LAST_EVENT_ID_HEADER};
pub use error::BackendClientError;
pub use retry::{RetryAfterExtractor, status_error};
