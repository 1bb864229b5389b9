//! Prometheus Metrics Module
//!
//! Counters and gauges for the synchronization core.
//!
//! # Metrics Categories
//!
//! - **Fetches**: card fetches by trigger and outcome, cache hits, retries
//! - **Dedup**: fetches skipped because one was in flight or cooling down
//! - **Pending refresh**: refreshes that never settled
//! - **Stream**: frames by kind, reconnects by cause, session state
//!
//! Recording without an installed recorder is a no-op, so library code and
//! tests can call these freely.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and describe every metric.
///
/// Later calls return the handle from the first successful call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "card_sync_fetches_total",
        "Card fetches by trigger and outcome"
    );
    describe_counter!(
        "card_sync_cache_hits_total",
        "Not-modified responses served from the card cache"
    );
    describe_counter!(
        "card_sync_fetch_retries_total",
        "Fetches retried after a backend overload signal"
    );
    describe_counter!(
        "card_sync_dedup_skips_total",
        "Fetches skipped by in-flight dedup or cooldown"
    );
    describe_counter!(
        "card_sync_pending_timeouts_total",
        "Pending refreshes that timed out before settling"
    );
    describe_counter!(
        "card_sync_stream_frames_total",
        "Event stream frames by kind"
    );
    describe_counter!(
        "card_sync_stream_reconnects_total",
        "Event stream reconnects by cause"
    );
    describe_gauge!(
        "card_sync_stream_state",
        "Event stream session state (0 disconnected .. 4 fallback polling)"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Kind of a received stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Default-event frame dispatched as a notification.
    Message,
    /// Comment-only heartbeat.
    Heartbeat,
    /// Named non-default event.
    Named,
    /// Data that failed to decode.
    Malformed,
    /// Replayed frame already seen.
    Duplicate,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Heartbeat => "heartbeat",
            Self::Named => "named",
            Self::Malformed => "malformed",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Why the stream reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectCause {
    /// Connect or read failure.
    Error,
    /// Backend rate-limited the connect.
    RateLimited,
    /// Server closed the stream.
    Closed,
}

impl ReconnectCause {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::RateLimited => "rate_limited",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed fetch.
pub fn record_fetch(source: &'static str, outcome: &'static str) {
    counter!(
        "card_sync_fetches_total",
        "source" => source,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a not-modified cache hit.
pub fn record_cache_hit() {
    counter!("card_sync_cache_hits_total").increment(1);
}

/// Record a retry after an overload signal.
pub fn record_fetch_retry() {
    counter!("card_sync_fetch_retries_total").increment(1);
}

/// Record a skipped fetch.
pub fn record_dedup_skip(reason: &'static str) {
    counter!("card_sync_dedup_skips_total", "reason" => reason).increment(1);
}

/// Record a pending refresh that timed out.
pub fn record_pending_timeout() {
    counter!("card_sync_pending_timeouts_total").increment(1);
}

/// Record a received stream frame.
pub fn record_stream_frame(kind: FrameKind) {
    counter!("card_sync_stream_frames_total", "kind" => kind.as_str()).increment(1);
}

/// Record a stream reconnect.
pub fn record_stream_reconnect(cause: ReconnectCause) {
    counter!("card_sync_stream_reconnects_total", "cause" => cause.as_str()).increment(1);
}

/// Publish the stream session state code.
pub fn set_stream_state(code: u8) {
    gauge!("card_sync_stream_state").set(f64::from(code));
}

// =============================================================================
// Tests
// =============================================================================
