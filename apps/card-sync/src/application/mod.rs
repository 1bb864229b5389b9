//! Application Layer - Synchronization services and port definitions.
//!
//! This layer coordinates the pure domain logic with the backend, the event
//! stream and the rendering layer through the ports it defines.

/// Port interfaces for the backend, event stream and rendering sink.
pub mod ports;

/// Fetch coordination and pending-refresh supervision.
pub mod services;
