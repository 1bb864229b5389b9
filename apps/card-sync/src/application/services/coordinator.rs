//! Fetch-and-Cache Coordinator
//!
//! Owns the card cache, the revalidation-token cache, the in-flight set and
//! the per-context cancellation tokens. Every render goes through
//! [`CardCoordinator::fetch_and_render`].
//!
//! # Guarantees
//!
//! - At most one fetch per instrument is in flight. A concurrent caller gets
//!   `Ok(None)` instead of a second request.
//! - A "not modified" answer reuses the cached view model unchanged.
//! - A fresh answer is authoritative when it resolves, except that a lower
//!   backend version never replaces a higher cached one.
//! - Tearing down a context cancels its fetches and pending-refresh tasks.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::pending::{PendingConfig, PendingKey, PendingRefreshSupervisor, PollVerdict};
use crate::application::ports::{CardBackend, CardResponse, CardSink, ChatMessage, EnqueueAck};
use crate::domain::cache::LruCache;
use crate::domain::card::{CardViewModel, TICKER_NOT_FOUND};
use crate::domain::focus::FocusRegistry;
use crate::domain::instrument::{ContextId, InstrumentKey};
use crate::domain::normalizer::{normalize, normalize_not_found, snapshot};
use crate::domain::treatment::{self, MessageStatus, RenderIntent};
use crate::error::SyncError;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Card and revalidation-token cache capacity.
    pub cache_capacity: usize,
    /// Maximum tracked contexts (focus and cancellation tokens).
    pub context_capacity: usize,
    /// Window in which repeated stream-triggered fetches for a key are skipped.
    pub cooldown: Duration,
    /// Lower bound on a server-supplied retry delay.
    pub retry_after_min: Duration,
    /// Upper bound on a server-supplied retry delay.
    pub retry_after_max: Duration,
    /// Retry delay when the server supplies none.
    pub retry_after_default: Duration,
    /// Pending-refresh supervisor settings.
    pub pending: PendingConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 200,
            context_capacity: 64,
            cooldown: Duration::from_millis(750),
            retry_after_min: Duration::from_millis(250),
            retry_after_max: Duration::from_secs(10),
            retry_after_default: Duration::from_secs(1),
            pending: PendingConfig::default(),
        }
    }
}

/// What triggered a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchSource {
    /// Explicit user request.
    User,
    /// Stream notification.
    Stream,
    /// Pending-refresh poll loop.
    PendingPoll,
    /// Stream fallback poller.
    FallbackPoll,
    /// Watchlist rotation revisiting a context.
    Watchlist,
}

impl FetchSource {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Stream => "stream",
            Self::PendingPoll => "pending_poll",
            Self::FallbackPoll => "fallback_poll",
            Self::Watchlist => "watchlist",
        }
    }

    const fn honors_cooldown(self) -> bool {
        matches!(self, Self::Stream | Self::FallbackPoll | Self::Watchlist)
    }
}

/// Options for [`CardCoordinator::fetch_and_render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Trigger.
    pub source: FetchSource,
    /// Render intent passed to the treatment selector.
    pub intent: RenderIntent,
}

impl FetchOptions {
    /// Build options.
    #[must_use]
    pub const fn new(source: FetchSource, intent: RenderIntent) -> Self {
        Self { source, intent }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnqueueKind {
    Analyze,
    Pin,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct CoordinatorState {
    cards: LruCache<InstrumentKey, Arc<CardViewModel>>,
    etags: LruCache<InstrumentKey, String>,
    cooldown: LruCache<InstrumentKey, Instant>,
    in_flight: HashSet<InstrumentKey>,
    focus: FocusRegistry,
    contexts: LruCache<ContextId, CancellationToken>,
}

impl CoordinatorState {
    fn new(config: &CoordinatorConfig) -> Self {
        Self {
            cards: LruCache::new(config.cache_capacity),
            etags: LruCache::new(config.cache_capacity),
            cooldown: LruCache::new(config.cache_capacity),
            in_flight: HashSet::new(),
            focus: FocusRegistry::new(config.context_capacity),
            contexts: LruCache::new(config.context_capacity),
        }
    }

    fn clear(&mut self) {
        self.cards.clear();
        self.etags.clear();
        self.cooldown.clear();
        self.in_flight.clear();
        self.focus.clear();
        for (_, token) in self.contexts.drain() {
            token.cancel();
        }
    }
}

/// Removes the key from the in-flight set when the fetch ends.
struct InFlightGuard<'a> {
    state: &'a Mutex<CoordinatorState>,
    key: InstrumentKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}

enum Resolved {
    Cached(Arc<CardViewModel>),
    Fresh(CardViewModel),
}

// =============================================================================
// Coordinator
// =============================================================================

/// Fetches, caches and renders cards.
pub struct CardCoordinator {
    backend: Arc<dyn CardBackend>,
    sink: Arc<dyn CardSink>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    pending: PendingRefreshSupervisor,
    root: CancellationToken,
}

impl std::fmt::Debug for CardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardCoordinator")
            .field("config", &self.config)
            .field("cached_cards", &self.state.lock().cards.len())
            .field("pending", &self.pending.tracked())
            .finish_non_exhaustive()
    }
}

impl CardCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CardBackend>,
        sink: Arc<dyn CardSink>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let root = CancellationToken::new();
        let pending = PendingRefreshSupervisor::new(config.pending.clone(), root.child_token());
        Arc::new(Self {
            backend,
            sink,
            state: Mutex::new(CoordinatorState::new(&config)),
            config,
            pending,
            root,
        })
    }

    /// Coordinator configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Pending-refresh supervisor.
    #[must_use]
    pub const fn pending(&self) -> &PendingRefreshSupervisor {
        &self.pending
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Sink used for renders and messages.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn CardSink> {
        &self.sink
    }

    /// Cached view model for `key`.
    #[must_use]
    pub fn cached(&self, key: &InstrumentKey) -> Option<Arc<CardViewModel>> {
        self.state.lock().cards.peek(key).cloned()
    }

    /// Cached revalidation token for `key`.
    #[must_use]
    pub fn cached_etag(&self, key: &InstrumentKey) -> Option<String> {
        self.state.lock().etags.peek(key).cloned()
    }

    // -------------------------------------------------------------------------
    // Focus
    // -------------------------------------------------------------------------

    /// Focus `raw` in `context`, make the context active and render it.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_and_render`](Self::fetch_and_render).
    pub async fn focus(
        self: &Arc<Self>,
        context: &ContextId,
        raw: &str,
    ) -> Result<Option<Arc<CardViewModel>>, SyncError> {
        let Some(key) = InstrumentKey::normalize(raw) else {
            return Err(self.reject_invalid(context, raw));
        };
        self.state.lock().focus.focus(context.clone(), key.clone());
        tracing::debug!(context = %context, ticker = %key, "Focused instrument");

        self.fetch_and_render(
            context,
            key.as_str(),
            FetchOptions::new(FetchSource::User, RenderIntent::Open),
        )
        .await
    }

    /// Make `context` the active context.
    pub fn activate(&self, context: &ContextId) {
        self.state.lock().focus.activate(context.clone());
    }

    /// Active context and its focused instrument.
    #[must_use]
    pub fn active_focus(&self) -> Option<(ContextId, InstrumentKey)> {
        self.state.lock().focus.active_focus()
    }

    /// Active context.
    #[must_use]
    pub fn active_context(&self) -> Option<ContextId> {
        self.state.lock().focus.active().cloned()
    }

    /// Whether `key` is focused in the active context.
    #[must_use]
    pub fn is_active_focus(&self, key: &InstrumentKey) -> bool {
        self.state.lock().focus.is_active_focus(key)
    }

    // -------------------------------------------------------------------------
    // Fetch
    // -------------------------------------------------------------------------

    /// Fetch the card for `raw`, update the caches and render it in `context`.
    ///
    /// Returns `Ok(None)` when the fetch was skipped because one is already in
    /// flight for the key, or a stream-triggered fetch hit the cooldown window.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a malformed symbol (an error message is posted).
    /// - `Cancelled` when the context was torn down mid-fetch.
    /// - Any backend error left after the single retry.
    pub async fn fetch_and_render(
        self: &Arc<Self>,
        context: &ContextId,
        raw: &str,
        options: FetchOptions,
    ) -> Result<Option<Arc<CardViewModel>>, SyncError> {
        let Some(key) = InstrumentKey::normalize(raw) else {
            return Err(self.reject_invalid(context, raw));
        };
        if self.root.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let Some(_guard) = self.begin_fetch(&key, options.source) else {
            return Ok(None);
        };
        let cancel = self.context_token(context);

        tracing::debug!(
            context = %context,
            ticker = %key,
            source = options.source.as_str(),
            "Fetching card"
        );

        let resolved = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SyncError::Cancelled),
            resolved = self.resolve(&key, &cancel) => resolved,
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                metrics::record_fetch(options.source.as_str(), err.kind());
                tracing::warn!(
                    context = %context,
                    ticker = %key,
                    source = options.source.as_str(),
                    error = %err,
                    "Card fetch failed"
                );
                return Err(err);
            }
        };

        let vm = match resolved {
            Resolved::Cached(vm) => {
                metrics::record_fetch(options.source.as_str(), "not_modified");
                metrics::record_cache_hit();
                tracing::debug!(ticker = %key, "Card not modified, reusing cached view model");
                vm
            }
            Resolved::Fresh(vm) => {
                let outcome = if vm.is_not_found() { "not_found" } else { "fresh" };
                metrics::record_fetch(options.source.as_str(), outcome);
                self.store(&key, vm)
            }
        };

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let treatment = treatment::select_with_intent(&vm, options.intent);
        self.sink.render_card(context, &vm, &treatment);

        let pending_key: PendingKey = (context.clone(), key);
        if treatment.refresh_pending() {
            self.arm_pending(pending_key);
        } else {
            self.pending.settle(&pending_key);
        }

        Ok(Some(vm))
    }

    fn begin_fetch(&self, key: &InstrumentKey, source: FetchSource) -> Option<InFlightGuard<'_>> {
        let mut state = self.state.lock();

        if state.in_flight.contains(key) {
            metrics::record_dedup_skip("in_flight");
            tracing::debug!(ticker = %key, source = source.as_str(), "Fetch already in flight");
            return None;
        }

        if source.honors_cooldown()
            && state
                .cooldown
                .peek(key)
                .is_some_and(|at| at.elapsed() < self.config.cooldown)
        {
            metrics::record_dedup_skip("cooldown");
            tracing::debug!(ticker = %key, source = source.as_str(), "Fetch inside cooldown window");
            return None;
        }

        state.in_flight.insert(key.clone());
        state.cooldown.insert(key.clone(), Instant::now());
        Some(InFlightGuard {
            state: &self.state,
            key: key.clone(),
        })
    }

    async fn resolve(
        &self,
        key: &InstrumentKey,
        cancel: &CancellationToken,
    ) -> Result<Resolved, SyncError> {
        let etag = self.cached_etag(key);

        match self.fetch_with_retry(key, etag.as_deref(), cancel).await {
            Ok(CardResponse::NotModified) => {
                if let Some(vm) = self.state.lock().cards.get(key).cloned() {
                    return Ok(Resolved::Cached(vm));
                }
                tracing::debug!(ticker = %key, "Not modified without cached card, refetching");
                self.state.lock().etags.remove(key);

                match self.fetch_with_retry(key, None, cancel).await {
                    Ok(CardResponse::Fresh { payload, etag }) => {
                        Ok(Resolved::Fresh(Self::build(key, &payload, etag)))
                    }
                    Ok(CardResponse::NotModified) => Err(SyncError::Decode(
                        "not modified without a revalidation token".to_string(),
                    )),
                    Err(SyncError::NotFound(_)) => Ok(Resolved::Fresh(normalize_not_found(key))),
                    Err(err) => Err(err),
                }
            }
            Ok(CardResponse::Fresh { payload, etag }) => {
                Ok(Resolved::Fresh(Self::build(key, &payload, etag)))
            }
            Err(SyncError::NotFound(_)) => Ok(Resolved::Fresh(normalize_not_found(key))),
            Err(err) => Err(err),
        }
    }

    async fn fetch_with_retry(
        &self,
        key: &InstrumentKey,
        etag: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CardResponse, SyncError> {
        match self.backend.fetch_card(key, etag, cancel).await {
            Err(err) if err.is_retryable() => {
                let delay = self.retry_delay(err.retry_after());
                metrics::record_fetch_retry();
                tracing::info!(
                    ticker = %key,
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Backend overloaded, retrying once"
                );

                tokio::select! {
                    () = cancel.cancelled() => return Err(SyncError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                self.backend.fetch_card(key, etag, cancel).await
            }
            other => other,
        }
    }

    fn retry_delay(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.config.retry_after_default)
            .max(self.config.retry_after_min)
            .min(self.config.retry_after_max)
    }

    fn build(key: &InstrumentKey, payload: &Value, etag: Option<String>) -> CardViewModel {
        let mut vm = normalize(payload, key);
        if etag.is_some() {
            vm.etag = etag;
        }
        vm
    }

    /// Merge forward, apply the version guard and write both caches.
    fn store(&self, key: &InstrumentKey, mut vm: CardViewModel) -> Arc<CardViewModel> {
        let mut state = self.state.lock();

        if let Some(prior) = state.cards.peek(key) {
            if let (Some(next), Some(current)) = (vm.version, prior.version)
                && next < current
            {
                tracing::debug!(
                    ticker = %key,
                    version = next,
                    cached_version = current,
                    "Discarding response older than cached card"
                );
                return Arc::clone(prior);
            }

            if vm.refresh_triggered {
                let (snapshot, carried) =
                    snapshot::merge_forward(&vm.cards.snapshot, &prior.cards.snapshot);
                if carried > 0 {
                    tracing::debug!(ticker = %key, fields = carried, "Merged forward snapshot fields");
                    vm.cards.snapshot = snapshot;
                }
            }
        }

        let vm = Arc::new(vm);
        if let Some((evicted, _)) = state.cards.insert(key.clone(), Arc::clone(&vm)) {
            state.etags.remove(&evicted);
        }
        match &vm.etag {
            Some(etag) => {
                state.etags.insert(key.clone(), etag.clone());
            }
            None => {
                state.etags.remove(key);
            }
        }
        vm
    }

    // -------------------------------------------------------------------------
    // Pending refresh
    // -------------------------------------------------------------------------

    fn arm_pending(self: &Arc<Self>, key: PendingKey) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let (context, ticker) = key.clone();

        let poll = {
            let weak = weak.clone();
            let context = context.clone();
            let ticker = ticker.clone();
            move || {
                let weak = weak.clone();
                let context = context.clone();
                let ticker = ticker.clone();
                async move {
                    match weak.upgrade() {
                        Some(coordinator) => coordinator.poll_pending(&context, &ticker).await,
                        None => PollVerdict::Stop,
                    }
                }
            }
        };

        let on_timeout = move || {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.sink.post_message(
                    &context,
                    ChatMessage::new(
                        Some(ticker.clone()),
                        treatment::timeout_message(&ticker),
                        MessageStatus::Error,
                    ),
                );
            }
        };

        self.pending.arm(key, poll, on_timeout);
    }

    async fn poll_pending(self: &Arc<Self>, context: &ContextId, key: &InstrumentKey) -> PollVerdict {
        let options = FetchOptions::new(FetchSource::PendingPoll, RenderIntent::Update);
        match self.fetch_and_render(context, key.as_str(), options).await {
            Ok(Some(vm)) => {
                if treatment::select(&vm).refresh_pending() {
                    PollVerdict::Pending
                } else {
                    PollVerdict::Settled
                }
            }
            Ok(None) => PollVerdict::Pending,
            Err(err) if err.is_retryable() => PollVerdict::Pending,
            Err(err) => {
                tracing::debug!(context = %context, ticker = %key, error = %err, "Pending poll stopping");
                PollVerdict::Stop
            }
        }
    }

    // -------------------------------------------------------------------------
    // Enqueue
    // -------------------------------------------------------------------------

    /// Ask the backend to (re)analyze `raw` and track the result.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed symbol, or the backend error.
    pub async fn request_analysis(
        self: &Arc<Self>,
        context: &ContextId,
        raw: &str,
    ) -> Result<EnqueueAck, SyncError> {
        self.enqueue(context, raw, EnqueueKind::Analyze).await
    }

    /// Pin `raw` on the backend and track the result.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed symbol, or the backend error.
    pub async fn pin(
        self: &Arc<Self>,
        context: &ContextId,
        raw: &str,
    ) -> Result<EnqueueAck, SyncError> {
        self.enqueue(context, raw, EnqueueKind::Pin).await
    }

    async fn enqueue(
        self: &Arc<Self>,
        context: &ContextId,
        raw: &str,
        kind: EnqueueKind,
    ) -> Result<EnqueueAck, SyncError> {
        let Some(key) = InstrumentKey::normalize(raw) else {
            return Err(self.reject_invalid(context, raw));
        };
        let cancel = self.context_token(context);
        let tag = key.cashtag();

        let result = match kind {
            EnqueueKind::Analyze => self.backend.analyze(&key, &cancel).await,
            EnqueueKind::Pin => self.backend.pin(&key, &cancel).await,
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(SyncError::NotFound(_)) => {
                self.post_not_found(context, &key);
                return Err(SyncError::NotFound(key.to_string()));
            }
            Err(err) => {
                tracing::warn!(context = %context, ticker = %key, error = %err, "Enqueue failed");
                self.post(
                    context,
                    &key,
                    format!("Could not reach the backend for {tag}."),
                    MessageStatus::Error,
                );
                return Err(err);
            }
        };

        if ack.errors.iter().any(|code| code == TICKER_NOT_FOUND) {
            self.post_not_found(context, &key);
            return Ok(ack);
        }

        let content = match (kind, ack.enqueued, ack.deduped) {
            (EnqueueKind::Analyze, true, _) => format!("Queued a fresh analysis for {tag}."),
            (EnqueueKind::Analyze, false, true) => format!("Analysis for {tag} is already queued."),
            (EnqueueKind::Pin, true, _) => format!("Pinned {tag}; a refresh is queued."),
            (EnqueueKind::Pin, false, true) => format!("{tag} is pinned; a refresh is already queued."),
            (_, false, false) => {
                let codes = if ack.errors.is_empty() {
                    "no job queued".to_string()
                } else {
                    ack.errors.join(", ")
                };
                self.post(
                    context,
                    &key,
                    format!("Could not queue work for {tag} ({codes})."),
                    MessageStatus::Error,
                );
                return Ok(ack);
            }
        };

        tracing::info!(
            context = %context,
            ticker = %key,
            enqueued = ack.enqueued,
            deduped = ack.deduped,
            "Backend work queued"
        );
        self.post(context, &key, content, MessageStatus::Sent);
        self.arm_pending((context.clone(), key));
        Ok(ack)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Cancel every fetch, timer and poll loop owned by `context`.
    pub fn teardown_context(&self, context: &ContextId) {
        let token = {
            let mut state = self.state.lock();
            state.focus.remove(context);
            state.contexts.remove(context)
        };
        if let Some(token) = token {
            token.cancel();
        }
        let pending = self.pending.cancel_context(context);
        tracing::info!(context = %context, pending_cancelled = pending, "Context torn down");
    }

    /// Cancel everything and clear all caches.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.pending.shutdown();
        self.state.lock().clear();
        tracing::info!("Card coordinator shut down");
    }

    fn context_token(&self, context: &ContextId) -> CancellationToken {
        let mut state = self.state.lock();
        if let Some(token) = state.contexts.get(context) {
            return token.clone();
        }
        let token = self.root.child_token();
        if let Some((evicted, old)) = state.contexts.insert(context.clone(), token.clone()) {
            tracing::debug!(context = %evicted, "Evicted context token");
            old.cancel();
        }
        token
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    fn reject_invalid(&self, context: &ContextId, raw: &str) -> SyncError {
        tracing::debug!(context = %context, input = raw, "Rejected invalid ticker");
        self.sink.post_message(
            context,
            ChatMessage::new(
                None,
                format!("\"{}\" is not a valid ticker.", raw.trim()),
                MessageStatus::Error,
            ),
        );
        SyncError::InvalidInput(raw.to_string())
    }

    fn post_not_found(&self, context: &ContextId, key: &InstrumentKey) {
        let treatment = treatment::select(&normalize_not_found(key));
        self.post(context, key, treatment.content().to_string(), MessageStatus::Error);
    }

    fn post(&self, context: &ContextId, key: &InstrumentKey, content: String, status: MessageStatus) {
        self.sink
            .post_message(context, ChatMessage::new(Some(key.clone()), content, status));
    }
}

impl Drop for CardCoordinator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
