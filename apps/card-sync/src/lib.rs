#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Card Sync - Analysis Card Synchronization Core
//!
//! Keeps per-instrument analysis cards in sync with the card backend and
//! decides how each one should be presented.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and functions
//!   - `instrument`: Instrument keys and context ids
//!   - `card`: View model, typed cards, missing-data blocks
//!   - `normalizer`: Backend payload → view model
//!   - `treatment`: Display treatment selection and phrasing
//!   - `cache` / `focus`: Bounded LRU and per-context focus registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Backend, event stream and rendering contracts
//!   - `services`: Fetch coordinator and pending-refresh supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `backend`: reqwest adapter for cards, enqueue and the event stream
//!   - `stream`: Frame decoder, reconnect policy, session manager
//!   - `sink`: Tracing-backed rendering sink
//!   - `config` / `metrics` / `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! user / stream / poll ──► CardCoordinator ──► CardBackend (HTTP)
//!                               │
//!                               ├─► normalize ─► cache ─► select treatment ─► CardSink
//!                               └─► PendingRefreshSupervisor (poll until settled)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Crate-wide error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::card::CardViewModel;
pub use domain::instrument::{ContextId, InstrumentKey};
pub use domain::treatment::{DisplayTreatment, MessageStatus, RenderIntent};

// Ports and services
pub use application::ports::{CardBackend, CardSink, ChatMessage, EventStreamTransport};
pub use application::services::{
    CardCoordinator, CoordinatorConfig, FetchOptions, FetchSource, WatchlistRotation,
};

// Errors
pub use error::SyncError;

// Infrastructure
pub use infrastructure::backend::{BackendClientConfig, HttpCardBackend};
pub use infrastructure::config::{ConfigError, SyncConfig};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::sink::TracingCardSink;
pub use infrastructure::stream::{SessionState, StreamSession, StreamSessionConfig};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
