//! Configuration Module
//!
//! Configuration loading for the synchronizer binary and its components.

mod settings;

pub use settings::{
    ApiKey, BackendSettings, CacheSettings, ConfigError, PendingSettings, StreamSettings,
    SyncConfig,
};
