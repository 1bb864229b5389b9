//! Card Sync Configuration Settings
//!
//! Configuration types for the synchronizer, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{CoordinatorConfig, PendingConfig};
use crate::infrastructure::backend::BackendClientConfig;
use crate::infrastructure::stream::{ReconnectConfig, StreamSessionConfig};

/// Card backend API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Card backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL.
    pub base_url: String,
    /// Optional API key.
    pub api_key: Option<ApiKey>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Persisted fallback upsert flag. Surfaced only.
    pub persisted_fallback_upsert: bool,
}

/// Event stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Stream endpoint path.
    pub path: String,
    /// Recent events replayed on every connect.
    pub replay: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection attempts before falling back to polling (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Cap on a rate-limit retry hint.
    pub max_retry_after: Duration,
    /// Fallback poll interval.
    pub fallback_poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            path: "/stream/user".to_string(),
            replay: 20,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(15),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 12,
            max_retry_after: Duration::from_secs(60),
            fallback_poll_interval: Duration::from_secs(15),
        }
    }
}

/// Card cache and fetch settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Card cache capacity.
    pub capacity: usize,
    /// Cooldown for stream-triggered fetches.
    pub cooldown: Duration,
    /// Lower clamp for retry hints.
    pub retry_after_min: Duration,
    /// Upper clamp for retry hints.
    pub retry_after_max: Duration,
    /// Retry delay without a hint.
    pub retry_after_default: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 200,
            cooldown: Duration::from_millis(750),
            retry_after_min: Duration::from_millis(250),
            retry_after_max: Duration::from_secs(10),
            retry_after_default: Duration::from_secs(1),
        }
    }
}

/// Pending-refresh settings.
#[derive(Debug, Clone)]
pub struct PendingSettings {
    /// Time allowed for a card to settle.
    pub timeout: Duration,
    /// Poll interval.
    pub poll_interval: Duration,
    /// Tracked key capacity.
    pub capacity: usize,
}

impl Default for PendingSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2500),
            capacity: 256,
        }
    }
}

/// Complete synchronizer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend connection.
    pub backend: BackendSettings,
    /// Event stream.
    pub stream: StreamSettings,
    /// Card cache and fetch behavior.
    pub cache: CacheSettings,
    /// Pending refresh.
    pub pending: PendingSettings,
    /// Tickers focused at startup.
    pub watchlist: Vec<String>,
    /// How long each watched ticker holds the active context.
    pub watchlist_rotation: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WATCHLIST_ROTATION: Duration = Duration::from_secs(5);

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `CARD_BACKEND_URL` is missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("CARD_BACKEND_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CARD_BACKEND_URL".to_string()))?;
        if base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("CARD_BACKEND_URL".to_string()));
        }

        let env = Lookup(&lookup);

        let backend = BackendSettings {
            base_url: base_url.trim().to_string(),
            api_key: lookup("CARD_BACKEND_API_KEY")
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .map(ApiKey::new),
            timeout: env.duration_millis("CARD_BACKEND_TIMEOUT_MS", DEFAULT_TIMEOUT),
            persisted_fallback_upsert: env.bool("CARD_PERSISTED_FALLBACK_UPSERT", false),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            path: lookup("CARD_STREAM_PATH")
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .unwrap_or(defaults.path),
            replay: env.parse("CARD_STREAM_REPLAY", defaults.replay),
            reconnect_delay_initial: env.duration_millis(
                "CARD_STREAM_RECONNECT_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env
                .duration_millis("CARD_STREAM_RECONNECT_MAX_MS", defaults.reconnect_delay_max),
            reconnect_delay_multiplier: env.parse(
                "CARD_STREAM_RECONNECT_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "CARD_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            max_retry_after: env
                .duration_millis("CARD_STREAM_MAX_RETRY_AFTER_MS", defaults.max_retry_after),
            fallback_poll_interval: env
                .duration_millis("CARD_FALLBACK_POLL_MS", defaults.fallback_poll_interval),
        };

        let defaults = CacheSettings::default();
        let cache = CacheSettings {
            capacity: env.parse("CARD_CACHE_CAPACITY", defaults.capacity),
            cooldown: env.duration_millis("CARD_FETCH_COOLDOWN_MS", defaults.cooldown),
            retry_after_min: env
                .duration_millis("CARD_RETRY_AFTER_MIN_MS", defaults.retry_after_min),
            retry_after_max: env
                .duration_millis("CARD_RETRY_AFTER_MAX_MS", defaults.retry_after_max),
            retry_after_default: env
                .duration_millis("CARD_RETRY_AFTER_DEFAULT_MS", defaults.retry_after_default),
        };

        let defaults = PendingSettings::default();
        let pending = PendingSettings {
            timeout: env.duration_millis("CARD_PENDING_TIMEOUT_MS", defaults.timeout),
            poll_interval: env.duration_millis("CARD_PENDING_POLL_MS", defaults.poll_interval),
            capacity: env.parse("CARD_PENDING_CAPACITY", defaults.capacity),
        };

        let watchlist = lookup("CARD_WATCHLIST")
            .map(|raw| parse_watchlist(&raw))
            .unwrap_or_default();
        let watchlist_rotation =
            env.duration_millis("CARD_WATCHLIST_ROTATE_MS", DEFAULT_WATCHLIST_ROTATION);

        Ok(Self {
            backend,
            stream,
            cache,
            pending,
            watchlist,
            watchlist_rotation,
        })
    }

    /// Settings for the HTTP adapter.
    #[must_use]
    pub fn backend_client(&self) -> BackendClientConfig {
        BackendClientConfig {
            base_url: self.backend.base_url.clone(),
            api_key: self
                .backend
                .api_key
                .as_ref()
                .map(|key| key.expose().to_string()),
            timeout: self.backend.timeout,
            stream_path: self.stream.path.clone(),
        }
    }

    /// Settings for the card coordinator.
    #[must_use]
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cache_capacity: self.cache.capacity,
            cooldown: self.cache.cooldown,
            retry_after_min: self.cache.retry_after_min,
            retry_after_max: self.cache.retry_after_max,
            retry_after_default: self.cache.retry_after_default,
            pending: PendingConfig {
                timeout: self.pending.timeout,
                poll_interval: self.pending.poll_interval,
                capacity: self.pending.capacity,
            },
            ..CoordinatorConfig::default()
        }
    }

    /// Settings for the stream session.
    #[must_use]
    pub fn stream_session(&self) -> StreamSessionConfig {
        StreamSessionConfig {
            replay: self.stream.replay,
            reconnect: ReconnectConfig {
                initial_delay: self.stream.reconnect_delay_initial,
                max_delay: self.stream.reconnect_delay_max,
                multiplier: self.stream.reconnect_delay_multiplier,
                max_attempts: self.stream.max_reconnect_attempts,
                ..ReconnectConfig::default()
            },
            max_retry_after: self.stream.max_retry_after,
            fallback_poll_interval: self.stream.fallback_poll_interval,
            ..StreamSessionConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma-separated watchlist, dropping blanks and repeats.
fn parse_watchlist(raw: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for ticker in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tickers.iter().any(|seen| seen.eq_ignore_ascii_case(ticker)) {
            tickers.push(ticker.to_string());
        }
    }
    tickers
}

struct Lookup<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        (self.0)(key).map_or(default, |v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn missing_backend_url_is_an_error() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(v)) if v == "CARD_BACKEND_URL"));
        assert!(matches!(
            load(&[("CARD_BACKEND_URL", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("CARD_BACKEND_URL", "http://localhost:8000")]).unwrap();
        assert_eq!(config.backend.timeout, Duration::from_secs(10));
        assert!(config.backend.api_key.is_none());
        assert!(!config.backend.persisted_fallback_upsert);
        assert_eq!(config.stream.path, "/stream/user");
        assert_eq!(config.stream.replay, 20);
        assert_eq!(config.stream.max_reconnect_attempts, 12);
        assert_eq!(config.cache.capacity, 200);
        assert_eq!(config.cache.cooldown, Duration::from_millis(750));
        assert_eq!(config.pending.timeout, Duration::from_secs(120));
        assert_eq!(config.pending.poll_interval, Duration::from_millis(2500));
        assert!(config.watchlist.is_empty());
        assert_eq!(config.watchlist_rotation, Duration::from_secs(5));
    }

    #[test]
    fn overrides_and_malformed_values() {
        let config = load(&[
            ("CARD_BACKEND_URL", "http://backend"),
            ("CARD_BACKEND_API_KEY", "k-123"),
            ("CARD_BACKEND_TIMEOUT_MS", "2500"),
            ("CARD_PERSISTED_FALLBACK_UPSERT", "TRUE"),
            ("CARD_STREAM_REPLAY", "5"),
            ("CARD_STREAM_RECONNECT_MULTIPLIER", "not-a-number"),
            ("CARD_PENDING_POLL_MS", "100"),
            ("CARD_CACHE_CAPACITY", "-3"),
        ])
        .unwrap();

        assert_eq!(config.backend.timeout, Duration::from_millis(2500));
        assert_eq!(config.backend.api_key.as_ref().map(ApiKey::expose), Some("k-123"));
        assert!(config.backend.persisted_fallback_upsert);
        assert_eq!(config.stream.replay, 5);
        assert!((config.stream.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.pending.poll_interval, Duration::from_millis(100));
        assert_eq!(config.cache.capacity, 200);
    }

    #[test]
    fn watchlist_is_split_and_deduplicated() {
        let config = load(&[
            ("CARD_BACKEND_URL", "http://backend"),
            ("CARD_WATCHLIST", "nvda, AMD,,NVDA , $tsla"),
            ("CARD_WATCHLIST_ROTATE_MS", "1500"),
        ])
        .unwrap();
        assert_eq!(config.watchlist, vec!["nvda", "AMD", "$tsla"]);
        assert_eq!(config.watchlist_rotation, Duration::from_millis(1500));
    }

    #[test]
    fn api_key_redacted_debug() {
        let config = load(&[
            ("CARD_BACKEND_URL", "http://backend"),
            ("CARD_BACKEND_API_KEY", "super-secret"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn derived_component_configs() {
        let config = load(&[
            ("CARD_BACKEND_URL", "http://backend"),
            ("CARD_STREAM_PATH", "/events"),
            ("CARD_STREAM_MAX_RECONNECT_ATTEMPTS", "3"),
            ("CARD_PENDING_TIMEOUT_MS", "5000"),
        ])
        .unwrap();

        let client = config.backend_client();
        assert_eq!(client.stream_path, "/events");
        assert_eq!(client.base_url, "http://backend");

        let session = config.stream_session();
        assert_eq!(session.reconnect.max_attempts, 3);
        assert_eq!(session.replay, 20);

        let coordinator = config.coordinator();
        assert_eq!(coordinator.pending.timeout, Duration::from_secs(5));
        assert_eq!(coordinator.context_capacity, 64);
    }
}
