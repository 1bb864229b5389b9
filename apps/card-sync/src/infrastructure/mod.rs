//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// HTTP adapter for the card backend (cards, enqueue, event stream).
pub mod backend;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Headless rendering sink.
pub mod sink;

/// Event stream decoding and session management.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
