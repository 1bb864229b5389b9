//! HTTP card backend built on `reqwest`.
//!
//! Implements both [`CardBackend`] and [`EventStreamTransport`] against one
//! base URL. Per-request timeouts apply to card and enqueue calls only; the
//! event stream is long-lived and bounded by the connect timeout alone.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::BackendClientError;
use super::retry::status_error;
use crate::application::ports::{
    CardBackend, CardResponse, EnqueueAck, EventByteStream, EventStreamTransport, StreamRequest,
};
use crate::domain::instrument::InstrumentKey;
use crate::error::SyncError;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the stream resume point.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

const EVENT_STREAM: &str = "text/event-stream";

/// Adapter settings.
#[derive(Clone)]
pub struct BackendClientConfig {
    /// Backend base URL.
    pub base_url: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Per-request timeout for card and enqueue calls.
    pub timeout: Duration,
    /// Event stream path.
    pub stream_path: String,
}

impl std::fmt::Debug for BackendClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("stream_path", &self.stream_path)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    #[serde(default)]
    enqueued: bool,
    #[serde(default)]
    deduped: bool,
    #[serde(default)]
    errors: Vec<Value>,
}

impl From<EnqueueResponse> for EnqueueAck {
    fn from(response: EnqueueResponse) -> Self {
        Self {
            enqueued: response.enqueued,
            deduped: response.deduped,
            errors: response
                .errors
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect(),
        }
    }
}

/// `reqwest` implementation of the backend ports.
#[derive(Clone)]
pub struct HttpCardBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    stream_path: String,
}

impl std::fmt::Debug for HttpCardBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCardBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("stream_path", &self.stream_path)
            .finish_non_exhaustive()
    }
}

impl HttpCardBackend {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(config: &BackendClientConfig) -> Result<Self, BackendClientError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| BackendClientError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| BackendClientError::Client(e.to_string()))?;

        let stream_path = if config.stream_path.starts_with('/') {
            config.stream_path.clone()
        } else {
            format!("/{}", config.stream_path)
        };

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            timeout: config.timeout,
            stream_path,
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, SyncError> {
        cancellable(cancel, async {
            request
                .send()
                .await
                .map_err(|e| SyncError::from(BackendClientError::from(e)))
        })
        .await
    }

    async fn read_json(response: Response, cancel: &CancellationToken) -> Result<Value, SyncError> {
        let bytes = cancellable(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| SyncError::from(BackendClientError::from(e)))
        })
        .await?;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::from(BackendClientError::from(e)))
    }

    async fn enqueue(
        &self,
        action: &str,
        ticker: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<EnqueueAck, SyncError> {
        let url = self.url(&format!("/{action}/{ticker}"));
        let request = self.authorize(self.client.post(&url).timeout(self.timeout));

        tracing::debug!(ticker = %ticker, action, "Enqueue request");
        let response = self.send(request, cancel).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(ticker.to_string()));
        }
        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        let body = Self::read_json(response, cancel).await?;
        let parsed: EnqueueResponse =
            serde_json::from_value(body).map_err(|e| SyncError::from(BackendClientError::from(e)))?;
        Ok(parsed.into())
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SyncError::Cancelled),
        result = future => result,
    }
}

fn header_text(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl CardBackend for HttpCardBackend {
    async fn fetch_card(
        &self,
        ticker: &InstrumentKey,
        etag: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CardResponse, SyncError> {
        let url = self.url(&format!("/card/{ticker}"));
        let mut request = self.authorize(self.client.get(&url).timeout(self.timeout));
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = self.send(request, cancel).await?;
        let status = response.status();
        tracing::debug!(ticker = %ticker, status = status.as_u16(), "Card response");

        if status == StatusCode::NOT_MODIFIED {
            return Ok(CardResponse::NotModified);
        }

        let etag = header_text(&response, ETAG);

        if status == StatusCode::NOT_FOUND {
            return match Self::read_json(response, cancel).await {
                Ok(payload) if payload.is_object() => Ok(CardResponse::Fresh { payload, etag }),
                Ok(_) | Err(SyncError::Decode(_)) => Err(SyncError::NotFound(ticker.to_string())),
                Err(err) => Err(err),
            };
        }

        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        let payload = Self::read_json(response, cancel).await?;
        Ok(CardResponse::Fresh { payload, etag })
    }

    async fn analyze(
        &self,
        ticker: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<EnqueueAck, SyncError> {
        self.enqueue("analyze", ticker, cancel).await
    }

    async fn pin(
        &self,
        ticker: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<EnqueueAck, SyncError> {
        self.enqueue("pin", ticker, cancel).await
    }
}

#[async_trait]
impl EventStreamTransport for HttpCardBackend {
    async fn connect(&self, request: StreamRequest) -> Result<EventByteStream, SyncError> {
        let url = self.url(&self.stream_path);
        let mut builder = self
            .authorize(self.client.get(&url))
            .query(&[("replay", request.replay)])
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &request.last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, id);
        }

        // The body is unbounded; only the handshake is held to the request timeout.
        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(|e| SyncError::from(BackendClientError::from(e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers()));
        }

        let content_type = header_text(&response, CONTENT_TYPE).unwrap_or_default();
        if !content_type.to_ascii_lowercase().starts_with(EVENT_STREAM) {
            return Err(SyncError::StreamProtocol(format!(
                "unexpected content type {content_type:?}"
            )));
        }

        tracing::debug!(url = %url, replay = request.replay, "Event stream opened");
        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| SyncError::from(BackendClientError::from(e)))
        });
        Ok(Box::pin(body))
    }
}
