//! Reconnection Policy
//!
//! Exponential backoff for the event stream. A server `retry:` hint raises
//! the floor of the next delay; rate-limited connects bypass the attempt
//! budget entirely and wait for the server's hint instead.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Maximum delay between reconnects.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 12,
        }
    }
}

/// Exponential backoff state for one session.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
    server_floor: Option<Duration>,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
            server_floor: None,
        }
    }

    /// Next delay, or `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;

        let mut delay = self.apply_jitter(self.current_delay);
        if let Some(floor) = self.server_floor {
            delay = delay.max(floor.min(self.config.max_delay));
        }

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset after a healthy connection or heartbeat.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Record a server `retry:` hint.
    pub const fn set_server_hint(&mut self, hint: Duration) {
        self.server_floor = Some(hint);
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Delay before reconnecting after a rate-limited connect.
///
/// Uses the server hint directly, capped at `cap`; falls back to `fallback`
/// when the server sent none.
#[must_use]
pub fn rate_limited_delay(hint: Option<Duration>, fallback: Duration, cap: Duration) -> Duration {
    hint.unwrap_or(fallback).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(15));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 12);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let delays: Vec<u128> = (0..8)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 15_000, 15_000, 15_000]);
    }

    #[test]
    fn budget_is_twelve_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..12 {
            assert!(policy.next_delay().is_some());
        }
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 12);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn server_hint_raises_floor_within_cap() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        policy.set_server_hint(Duration::from_secs(3));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));

        policy.set_server_hint(Duration::from_secs(120));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[test]
    fn rate_limited_delay_prefers_hint() {
        let cap = Duration::from_secs(60);
        let fallback = Duration::from_secs(1);
        assert_eq!(
            rate_limited_delay(Some(Duration::from_secs(5)), fallback, cap),
            Duration::from_secs(5)
        );
        assert_eq!(rate_limited_delay(None, fallback, cap), fallback);
        assert_eq!(
            rate_limited_delay(Some(Duration::from_secs(600)), fallback, cap),
            cap
        );
    }
}
