//! Port Interfaces
//!
//! Contracts between the synchronization services and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CardBackend`: conditional card fetches and enqueue calls
//! - `EventStreamTransport`: opens the server-to-client event stream
//! - `CardSink`: the rendering layer (settled cards and chat messages)

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::card::CardViewModel;
use crate::domain::instrument::{ContextId, InstrumentKey};
use crate::domain::treatment::{DisplayTreatment, MessageStatus};
use crate::error::SyncError;

// =============================================================================
// Card Backend
// =============================================================================

/// Result of a conditional card fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CardResponse {
    /// The revalidation token still matches.
    NotModified,
    /// A full payload.
    Fresh {
        /// Raw JSON payload.
        payload: Value,
        /// Revalidation token from the response headers.
        etag: Option<String>,
    },
}

/// Acknowledgement of an enqueue request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueAck {
    /// A new job was enqueued.
    pub enqueued: bool,
    /// An equivalent job was already queued.
    pub deduped: bool,
    /// Backend error codes.
    pub errors: Vec<String>,
}

/// Card backend HTTP surface.
#[async_trait]
pub trait CardBackend: Send + Sync {
    /// `GET /card/{ticker}`, conditional on `etag` when given.
    async fn fetch_card(
        &self,
        ticker: &InstrumentKey,
        etag: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CardResponse, SyncError>;

    /// `POST /analyze/{ticker}`.
    async fn analyze(
        &self,
        ticker: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<EnqueueAck, SyncError>;

    /// `POST /pin/{ticker}`.
    async fn pin(
        &self,
        ticker: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<EnqueueAck, SyncError>;
}

// =============================================================================
// Event Stream Transport
// =============================================================================

/// Raw byte chunks of an open event stream.
pub type EventByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SyncError>> + Send>>;

/// Parameters for opening the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    /// Resume point (`Last-Event-ID`).
    pub last_event_id: Option<String>,
    /// Number of recent events to replay.
    pub replay: u32,
}

/// Opens the server-to-client event stream.
#[async_trait]
pub trait EventStreamTransport: Send + Sync {
    /// Connect and return the body as a byte stream.
    ///
    /// Fails with `StreamProtocol` when the response is not an event stream.
    async fn connect(&self, request: StreamRequest) -> Result<EventByteStream, SyncError>;
}

// =============================================================================
// Rendering Sink
// =============================================================================

/// A chat message posted to a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Instrument the message is about.
    pub ticker: Option<InstrumentKey>,
    /// Message text.
    pub content: String,
    /// Status flag.
    pub status: MessageStatus,
}

impl ChatMessage {
    /// Build a message.
    #[must_use]
    pub fn new(
        ticker: Option<InstrumentKey>,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            ticker,
            content: content.into(),
            status,
        }
    }
}

/// Rendering layer.
#[cfg_attr(test, mockall::automock)]
pub trait CardSink: Send + Sync {
    /// A settled view model and how to present it.
    fn render_card(
        &self,
        context: &ContextId,
        card: &Arc<CardViewModel>,
        treatment: &DisplayTreatment,
    );

    /// An informational or error message.
    fn post_message(&self, context: &ContextId, message: ChatMessage);
}
