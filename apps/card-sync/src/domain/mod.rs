//! Domain Layer - Card types and pure synchronization logic.
//!
//! Nothing in this layer performs I/O. Everything here is deterministic and
//! safe to call from any task.

/// Bounded LRU cache.
pub mod cache;

/// Card view model, missing-field declarations, enrichment state.
pub mod card;

/// Per-context focused instrument tracking.
pub mod focus;

/// Instrument and context identifiers.
pub mod instrument;

/// Backend payload normalization.
pub mod normalizer;

/// Display treatment selection.
pub mod treatment;
