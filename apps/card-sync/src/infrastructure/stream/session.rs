//! Stream Session Manager
//!
//! Owns the long-lived event stream connection.
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> ReconnectWait -> Connecting
//!                                   \                \
//!                                    `----------------`-> FallbackPolling
//! ```
//!
//! Non-rate-limited failures consume the reconnect budget. Once it is spent,
//! or on a protocol error, the session polls the active focus on a fixed
//! interval for the rest of its run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::frame::{FrameDecoder, StreamFrame};
use super::messages::{NotificationKind, UserChannelMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy, rate_limited_delay};
use crate::application::ports::{ChatMessage, EventByteStream, EventStreamTransport, StreamRequest};
use crate::application::services::{CardCoordinator, FetchOptions, FetchSource};
use crate::domain::cache::LruCache;
use crate::domain::instrument::InstrumentKey;
use crate::domain::treatment::{MessageStatus, RenderIntent};
use crate::error::SyncError;
use crate::infrastructure::metrics::{self, FrameKind, ReconnectCause};

/// Notice raised once when the session degrades to polling.
pub const DEGRADED_NOTICE: &str =
    "Live updates are unavailable; cards will refresh periodically instead.";

/// Warning raised once per connection for a named error frame.
pub const STREAM_WARNING: &str = "Live update stream reported a problem; updates may lag.";

// =============================================================================
// Configuration and State
// =============================================================================

/// Session tuning.
#[derive(Debug, Clone)]
pub struct StreamSessionConfig {
    /// Recent events to replay on every connect.
    pub replay: u32,
    /// Backoff for ordinary failures.
    pub reconnect: ReconnectConfig,
    /// Cap on a rate-limit retry hint.
    pub max_retry_after: Duration,
    /// Interval of the fallback poller.
    pub fallback_poll_interval: Duration,
    /// Remembered message ids for replay dedup.
    pub seen_capacity: usize,
}

impl Default for StreamSessionConfig {
    fn default() -> Self {
        Self {
            replay: 20,
            reconnect: ReconnectConfig::default(),
            max_retry_after: Duration::from_secs(60),
            fallback_poll_interval: Duration::from_secs(15),
            seen_capacity: 512,
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not running.
    Disconnected,
    /// Opening the stream.
    Connecting,
    /// Reading frames.
    Streaming,
    /// Waiting to reconnect.
    ReconnectWait,
    /// Stream abandoned; polling the focused instrument.
    FallbackPolling,
}

impl SessionState {
    /// Gauge value.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Streaming => 2,
            Self::ReconnectWait => 3,
            Self::FallbackPolling => 4,
        }
    }

    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::ReconnectWait => "reconnect_wait",
            Self::FallbackPolling => "fallback_polling",
        }
    }
}

enum ReadEnd {
    Aborted,
    Closed,
    Failed(SyncError),
}

/// Cursor state carried across connections.
struct Cursor {
    policy: ReconnectPolicy,
    last_event_id: Option<String>,
    seen: LruCache<String, ()>,
    warned: bool,
}

// =============================================================================
// Session
// =============================================================================

/// Event stream session bound to one coordinator.
pub struct StreamSession {
    transport: Arc<dyn EventStreamTransport>,
    coordinator: Arc<CardCoordinator>,
    config: StreamSessionConfig,
    state: watch::Sender<SessionState>,
    degraded_notified: AtomicBool,
    root: CancellationToken,
    reconnect_timer: CancellationToken,
    fallback_timer: CancellationToken,
    read_loop: CancellationToken,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Create a session. Nothing connects until [`run`](Self::run).
    #[must_use]
    pub fn new(
        transport: Arc<dyn EventStreamTransport>,
        coordinator: Arc<CardCoordinator>,
        config: StreamSessionConfig,
    ) -> Self {
        let root = coordinator.shutdown_token().child_token();
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            coordinator,
            config,
            state,
            degraded_notified: AtomicBool::new(false),
            reconnect_timer: root.child_token(),
            fallback_timer: root.child_token(),
            read_loop: root.child_token(),
            root,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Stop the session: reconnect timer, fallback timer, then the read loop.
    pub fn abort(&self) {
        self.reconnect_timer.cancel();
        self.fallback_timer.cancel();
        self.read_loop.cancel();
        self.root.cancel();
        tracing::info!("Stream session aborted");
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            metrics::set_stream_state(next.code());
            tracing::debug!(state = next.as_str(), "Stream session state");
        }
    }

    /// Run until aborted.
    pub async fn run(&self) {
        let mut cursor = Cursor {
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
            last_event_id: None,
            seen: LruCache::new(self.config.seen_capacity),
            warned: false,
        };

        while !self.root.is_cancelled() {
            self.set_state(SessionState::Connecting);
            let request = StreamRequest {
                last_event_id: cursor.last_event_id.clone(),
                replay: self.config.replay,
            };

            let connected = tokio::select! {
                biased;
                () = self.read_loop.cancelled() => break,
                result = self.transport.connect(request) => result,
            };

            let failure = match connected {
                Ok(stream) => {
                    self.set_state(SessionState::Streaming);
                    cursor.policy.reset();
                    cursor.warned = false;
                    tracing::info!(
                        last_event_id = cursor.last_event_id.as_deref().unwrap_or(""),
                        "Event stream connected"
                    );
                    match self.read(stream, &mut cursor).await {
                        ReadEnd::Aborted => break,
                        ReadEnd::Closed => None,
                        ReadEnd::Failed(err) => Some(err),
                    }
                }
                Err(err) => Some(err),
            };

            let delay = match failure {
                Some(SyncError::RateLimited { retry_after }) => {
                    metrics::record_stream_reconnect(ReconnectCause::RateLimited);
                    let delay = rate_limited_delay(
                        retry_after,
                        self.config.reconnect.initial_delay,
                        self.config.max_retry_after,
                    );
                    tracing::warn!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Event stream rate limited"
                    );
                    delay
                }
                Some(err) if err.is_fatal_for_stream() => {
                    tracing::warn!(error = %err, "Event stream protocol failure, switching to polling");
                    self.run_fallback().await;
                    break;
                }
                failure => {
                    let cause = if failure.is_some() {
                        ReconnectCause::Error
                    } else {
                        ReconnectCause::Closed
                    };
                    let Some(delay) = cursor.policy.next_delay() else {
                        tracing::warn!(
                            attempts = cursor.policy.attempt_count(),
                            "Event stream reconnect budget exhausted, switching to polling"
                        );
                        self.run_fallback().await;
                        break;
                    };
                    metrics::record_stream_reconnect(cause);
                    tracing::info!(
                        attempt = cursor.policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = ?failure,
                        "Event stream reconnecting"
                    );
                    delay
                }
            };

            self.set_state(SessionState::ReconnectWait);
            tokio::select! {
                biased;
                () = self.reconnect_timer.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SessionState::Disconnected);
    }

    async fn read(&self, mut stream: EventByteStream, cursor: &mut Cursor) -> ReadEnd {
        let mut decoder = FrameDecoder::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = self.read_loop.cancelled() => return ReadEnd::Aborted,
                chunk = stream.next() => chunk,
            };

            let bytes = match chunk {
                None => return ReadEnd::Closed,
                Some(Err(err)) => return ReadEnd::Failed(err),
                Some(Ok(bytes)) => bytes,
            };

            let frames = match decoder.push(&bytes) {
                Ok(frames) => frames,
                Err(err) => return ReadEnd::Failed(SyncError::Decode(err.to_string())),
            };

            for frame in frames {
                tokio::select! {
                    biased;
                    () = self.read_loop.cancelled() => return ReadEnd::Aborted,
                    () = self.handle_frame(frame, cursor) => {}
                }
            }
        }
    }

    async fn handle_frame(&self, frame: StreamFrame, cursor: &mut Cursor) {
        if let Some(id) = &frame.id {
            cursor.last_event_id = (!id.is_empty()).then(|| id.clone());
        }
        if let Some(retry) = frame.retry {
            cursor.policy.set_server_hint(retry);
        }

        if frame.is_heartbeat() {
            metrics::record_stream_frame(FrameKind::Heartbeat);
            cursor.policy.reset();
            return;
        }

        if !frame.is_default_event() {
            metrics::record_stream_frame(FrameKind::Named);
            tracing::warn!(
                event = frame.event_name(),
                data = frame.data.as_deref().unwrap_or(""),
                "Event stream error frame"
            );
            if !cursor.warned {
                cursor.warned = true;
                self.notify_active(STREAM_WARNING, MessageStatus::Error, None);
            }
            return;
        }

        let Some(data) = frame.data else {
            return;
        };

        let message = match UserChannelMessage::decode(&data) {
            Ok(message) => message,
            Err(err) => {
                metrics::record_stream_frame(FrameKind::Malformed);
                tracing::debug!(error = %err, "Dropping undecodable stream frame");
                return;
            }
        };

        if let Some(id) = &message.message_id {
            if cursor.seen.contains(id) {
                metrics::record_stream_frame(FrameKind::Duplicate);
                tracing::debug!(message_id = %id, "Skipping replayed message");
                return;
            }
            cursor.seen.insert(id.clone(), ());
        }

        metrics::record_stream_frame(FrameKind::Message);
        self.dispatch(message).await;
    }

    async fn dispatch(&self, message: UserChannelMessage) {
        match message.kind() {
            NotificationKind::CardUpdated => {
                let Some(ticker) = message.ticker else {
                    tracing::debug!("card_updated without ticker");
                    return;
                };
                if !self.coordinator.is_active_focus(&ticker) {
                    tracing::debug!(ticker = %ticker, "card_updated for unfocused ticker");
                    return;
                }
                self.refetch(&ticker, RenderIntent::Update).await;
            }
            NotificationKind::EnteredGapper => {
                self.notify_active(&message.describe(), MessageStatus::Info, message.ticker.clone());
                if let Some(ticker) = message.ticker {
                    let intent = if self.coordinator.cached(&ticker).is_some() {
                        RenderIntent::Update
                    } else {
                        RenderIntent::Open
                    };
                    self.refetch(&ticker, intent).await;
                }
            }
            NotificationKind::Other(kind) => {
                tracing::debug!(event_type = %kind, "Informational stream notification");
                self.notify_active(&message.describe(), MessageStatus::Info, message.ticker.clone());
            }
        }
    }

    async fn refetch(&self, ticker: &InstrumentKey, intent: RenderIntent) {
        let Some(context) = self.coordinator.active_context() else {
            tracing::debug!(ticker = %ticker, "No active context for stream refetch");
            return;
        };
        let options = FetchOptions::new(FetchSource::Stream, intent);
        if let Err(err) = self
            .coordinator
            .fetch_and_render(&context, ticker.as_str(), options)
            .await
        {
            tracing::warn!(ticker = %ticker, error = %err, "Stream-triggered fetch failed");
        }
    }

    fn notify_active(&self, content: &str, status: MessageStatus, ticker: Option<InstrumentKey>) {
        match self.coordinator.active_context() {
            Some(context) => self
                .coordinator
                .sink()
                .post_message(&context, ChatMessage::new(ticker, content, status)),
            None => tracing::info!(content, "No active context for stream notice"),
        }
    }

    async fn run_fallback(&self) {
        self.set_state(SessionState::FallbackPolling);
        if !self.degraded_notified.swap(true, Ordering::SeqCst) {
            self.notify_active(DEGRADED_NOTICE, MessageStatus::Error, None);
        }

        let interval = self.config.fallback_poll_interval;
        tracing::warn!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Event stream degraded to polling"
        );

        loop {
            tokio::select! {
                biased;
                () = self.fallback_timer.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }

            let Some((context, ticker)) = self.coordinator.active_focus() else {
                continue;
            };
            let options = FetchOptions::new(FetchSource::FallbackPoll, RenderIntent::Update);
            let result = tokio::select! {
                biased;
                () = self.fallback_timer.cancelled() => return,
                result = self.coordinator.fetch_and_render(&context, ticker.as_str(), options) => result,
            };
            if let Err(err) = result {
                tracing::debug!(ticker = %ticker, error = %err, "Fallback poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        CardBackend, CardResponse, CardSink, EnqueueAck,
    };
    use crate::application::services::CoordinatorConfig;
    use crate::domain::card::CardViewModel;
    use crate::domain::instrument::ContextId;
    use crate::domain::treatment::DisplayTreatment;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    type Script = Result<Vec<&'static str>, SyncError>;

    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        exhausted: SyncError,
        hold_open: bool,
        requests: Mutex<Vec<StreamRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>, exhausted: SyncError, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                exhausted,
                hold_open,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn connects(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl EventStreamTransport for ScriptedTransport {
        async fn connect(&self, request: StreamRequest) -> Result<EventByteStream, SyncError> {
            self.requests.lock().push(request);
            let next = self.script.lock().pop_front();
            let chunks = match next {
                Some(Ok(chunks)) => chunks,
                Some(Err(err)) => return Err(err),
                None => return Err(self.exhausted.clone()),
            };
            let body = futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok(chunk.as_bytes().to_vec()))
                    .collect::<Vec<_>>(),
            );
            if self.hold_open {
                Ok(Box::pin(body.chain(futures::stream::pending())))
            } else {
                Ok(Box::pin(body))
            }
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        fetched: Mutex<Vec<String>>,
        delay: Mutex<Duration>,
    }

    #[async_trait]
    impl CardBackend for CountingBackend {
        async fn fetch_card(
            &self,
            ticker: &InstrumentKey,
            _etag: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<CardResponse, SyncError> {
            self.fetched.lock().push(ticker.to_string());
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(CardResponse::Fresh {
                payload: json!({
                    "ticker": ticker.as_str(),
                    "card": {"header": {"current_price": 10.0}},
                    "errors": [],
                }),
                etag: None,
            })
        }

        async fn analyze(
            &self,
            _ticker: &InstrumentKey,
            _cancel: &CancellationToken,
        ) -> Result<EnqueueAck, SyncError> {
            Ok(EnqueueAck::default())
        }

        async fn pin(
            &self,
            _ticker: &InstrumentKey,
            _cancel: &CancellationToken,
        ) -> Result<EnqueueAck, SyncError> {
            Ok(EnqueueAck::default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        renders: Mutex<usize>,
        messages: Mutex<Vec<ChatMessage>>,
    }

    impl CardSink for RecordingSink {
        fn render_card(&self, _: &ContextId, _: &Arc<CardViewModel>, _: &DisplayTreatment) {
            *self.renders.lock() += 1;
        }

        fn post_message(&self, _: &ContextId, message: ChatMessage) {
            self.messages.lock().push(message);
        }
    }

    struct Harness {
        session: Arc<StreamSession>,
        transport: Arc<ScriptedTransport>,
        backend: Arc<CountingBackend>,
        sink: Arc<RecordingSink>,
        coordinator: Arc<CardCoordinator>,
    }

    fn fast_session_config(max_attempts: u32) -> StreamSessionConfig {
        StreamSessionConfig {
            replay: 5,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts,
            },
            max_retry_after: Duration::from_millis(5),
            fallback_poll_interval: Duration::from_millis(10),
            seen_capacity: 16,
        }
    }

    fn harness(transport: Arc<ScriptedTransport>, max_attempts: u32) -> Harness {
        harness_with(transport, fast_session_config(max_attempts))
    }

    fn harness_with(transport: Arc<ScriptedTransport>, config: StreamSessionConfig) -> Harness {
        let backend = Arc::new(CountingBackend::default());
        let sink = Arc::new(RecordingSink::default());
        let coordinator = CardCoordinator::new(
            backend.clone(),
            sink.clone(),
            CoordinatorConfig {
                cooldown: Duration::ZERO,
                ..CoordinatorConfig::default()
            },
        );
        let session = Arc::new(StreamSession::new(
            transport.clone(),
            coordinator.clone(),
            config,
        ));
        Harness {
            session,
            transport,
            backend,
            sink,
            coordinator,
        }
    }

    async fn focus(h: &Harness, ticker: &str) {
        h.coordinator
            .focus(&ContextId::new("ctx"), ticker)
            .await
            .unwrap();
        h.backend.fetched.lock().clear();
    }

    fn spawn(h: &Harness) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(&h.session);
        tokio::spawn(async move { session.run().await })
    }

    async fn wait_for(h: &Harness, state: SessionState) {
        let mut rx = h.session.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn card_updated_refetches_only_focused_ticker() {
        let transport = ScriptedTransport::new(
            vec![Ok(vec![
                ": hello\n\n",
                "data: {\"message_id\":\"1\",\"event_type\":\"card_updated\",\"ticker\":\"AMD\"}\n\n",
                "data: {\"message_id\":\"2\",\"event_type\":\"card_updated\",\"ticker\":\"nvda\"}\n\n",
            ])],
            SyncError::Network("done".into()),
            true,
        );
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;

        let task = spawn(&h);
        wait_for(&h, SessionState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*h.backend.fetched.lock(), vec!["NVDA".to_string()]);
        h.session.abort();
        task.await.unwrap();
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn entered_gapper_refetches_regardless_of_focus() {
        let transport = ScriptedTransport::new(
            vec![Ok(vec![
                "data: {\"message_id\":\"g\",\"event_type\":\"entered_gapper\",\"ticker\":\"GME\",\"reason\":\"gap up 12%\"}\n\n",
            ])],
            SyncError::Network("done".into()),
            true,
        );
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;

        let task = spawn(&h);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*h.backend.fetched.lock(), vec!["GME".to_string()]);
        let messages = h.sink.messages.lock().clone();
        assert!(messages.iter().any(|m| m.status == MessageStatus::Info
            && m.content.contains("$GME")
            && m.content.contains("gap up 12%")));
        h.session.abort();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn replayed_message_ids_are_skipped_and_resume_id_sent() {
        let frame = "id: 41\ndata: {\"message_id\":\"dup\",\"event_type\":\"card_updated\",\"ticker\":\"NVDA\"}\n\n";
        let transport = ScriptedTransport::new(
            vec![Ok(vec![frame]), Ok(vec![frame])],
            SyncError::Network("done".into()),
            false,
        );
        let h = harness_with(
            transport,
            StreamSessionConfig {
                fallback_poll_interval: Duration::from_secs(60),
                ..fast_session_config(1)
            },
        );
        focus(&h, "NVDA").await;

        let task = spawn(&h);
        wait_for(&h, SessionState::FallbackPolling).await;
        h.session.abort();
        task.await.unwrap();

        assert_eq!(*h.backend.fetched.lock(), vec!["NVDA".to_string()]);
        let requests = h.transport.requests.lock();
        assert_eq!(requests[0].last_event_id, None);
        assert_eq!(requests[0].replay, 5);
        assert_eq!(requests[1].last_event_id.as_deref(), Some("41"));
    }

    #[tokio::test]
    async fn named_error_frames_warn_once_per_connection() {
        let transport = ScriptedTransport::new(
            vec![Ok(vec![
                "event: error\ndata: overloaded\n\n",
                "event: error\ndata: overloaded\n\n",
                "data: not json\n\n",
            ])],
            SyncError::Network("done".into()),
            true,
        );
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;

        let task = spawn(&h);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let warnings = h
            .sink
            .messages
            .lock()
            .iter()
            .filter(|m| m.content == STREAM_WARNING)
            .count();
        assert_eq!(warnings, 1);
        assert_eq!(h.session.state(), SessionState::Streaming);
        h.session.abort();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_budget_switches_to_fallback_polling() {
        let transport =
            ScriptedTransport::new(vec![], SyncError::Network("refused".into()), false);
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;

        let task = spawn(&h);
        wait_for(&h, SessionState::FallbackPolling).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(h.transport.connects(), 4);
        assert!(!h.backend.fetched.lock().is_empty());
        let notices = h
            .sink
            .messages
            .lock()
            .iter()
            .filter(|m| m.content == DEGRADED_NOTICE)
            .count();
        assert_eq!(notices, 1);

        h.session.abort();
        task.await.unwrap();
        assert_eq!(h.transport.connects(), 4);
    }

    #[tokio::test]
    async fn rate_limits_do_not_consume_budget() {
        let limited = || Err(SyncError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        });
        let transport = ScriptedTransport::new(
            vec![limited(), limited(), limited(), limited(), limited()],
            SyncError::Network("refused".into()),
            false,
        );
        let h = harness(transport, 1);

        let task = spawn(&h);
        wait_for(&h, SessionState::FallbackPolling).await;

        assert_eq!(h.transport.connects(), 7);
        h.session.abort();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn protocol_error_falls_back_immediately() {
        let transport = ScriptedTransport::new(
            vec![Err(SyncError::StreamProtocol("text/html".into()))],
            SyncError::Network("refused".into()),
            false,
        );
        let h = harness(transport, 12);

        let task = spawn(&h);
        wait_for(&h, SessionState::FallbackPolling).await;

        assert_eq!(h.transport.connects(), 1);
        h.session.abort();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn abort_stops_dispatch() {
        let transport = ScriptedTransport::new(
            vec![Ok(vec![])],
            SyncError::Network("refused".into()),
            true,
        );
        let h = harness(transport, 3);

        let task = spawn(&h);
        wait_for(&h, SessionState::Streaming).await;
        h.session.abort();
        task.await.unwrap();

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test]
    async fn abort_drops_in_flight_dispatch() {
        let transport = ScriptedTransport::new(
            vec![Ok(vec![
                "data: {\"message_id\":\"1\",\"event_type\":\"card_updated\",\"ticker\":\"NVDA\"}\n\n",
            ])],
            SyncError::Network("done".into()),
            true,
        );
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;
        *h.backend.delay.lock() = Duration::from_millis(200);
        let rendered = *h.sink.renders.lock();

        let task = spawn(&h);
        wait_for(&h, SessionState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.backend.fetched.lock().len(), 1);

        h.session.abort();
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*h.sink.renders.lock(), rendered);
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn abort_drops_in_flight_fallback_poll() {
        let transport = ScriptedTransport::new(
            vec![Err(SyncError::StreamProtocol("text/html".into()))],
            SyncError::Network("refused".into()),
            false,
        );
        let h = harness(transport, 3);
        focus(&h, "NVDA").await;
        *h.backend.delay.lock() = Duration::from_millis(200);
        let rendered = *h.sink.renders.lock();

        let task = spawn(&h);
        wait_for(&h, SessionState::FallbackPolling).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.backend.fetched.lock().is_empty());

        h.session.abort();
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*h.sink.renders.lock(), rendered);
    }

    #[test]
    fn state_codes_are_ordered() {
        assert_eq!(SessionState::Disconnected.code(), 0);
        assert_eq!(SessionState::FallbackPolling.code(), 4);
        assert_eq!(SessionState::ReconnectWait.as_str(), "reconnect_wait");
    }
}
