//! Pending-Refresh Supervisor
//!
//! Tracks cards the backend is still building. For each `(context, ticker)`
//! at most one timeout and one poll loop run at a time; re-arming an armed
//! key is a no-op. The poll loop re-fetches on a fixed interval until the
//! card settles or a non-retryable error stops it. The timeout, if it fires
//! first, cancels the poll loop and reports the key as failed.
//!
//! Both trackers are bounded LRU maps; evicting an entry cancels its task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::LruCache;
use crate::domain::instrument::{ContextId, InstrumentKey};
use crate::infrastructure::metrics;

/// Key of a tracked refresh.
pub type PendingKey = (ContextId, InstrumentKey);

/// Supervisor timing and bounds.
#[derive(Debug, Clone)]
pub struct PendingConfig {
    /// Time allowed for a card to settle.
    pub timeout: Duration,
    /// Delay between re-fetches.
    pub poll_interval: Duration,
    /// Maximum tracked keys per tracker.
    pub capacity: usize,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2500),
            capacity: 256,
        }
    }
}

/// Outcome of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// The card is no longer refresh-pending.
    Settled,
    /// Keep polling.
    Pending,
    /// Non-retryable failure; stop polling (the timeout stays armed).
    Stop,
}

/// What an `arm` call started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmOutcome {
    /// A timeout was started.
    pub timeout_armed: bool,
    /// A poll loop was started.
    pub poll_armed: bool,
}

impl ArmOutcome {
    /// Whether anything new was started.
    #[must_use]
    pub const fn armed_anything(&self) -> bool {
        self.timeout_armed || self.poll_armed
    }
}

#[derive(Debug)]
struct Trackers {
    timeouts: LruCache<PendingKey, CancellationToken>,
    polls: LruCache<PendingKey, CancellationToken>,
}

impl Trackers {
    fn track_timeout(&mut self, key: PendingKey, token: CancellationToken) {
        if let Some((evicted, token)) = self.timeouts.insert(key, token) {
            tracing::debug!(context = %evicted.0, ticker = %evicted.1, "Evicted pending timeout");
            token.cancel();
        }
    }

    fn track_poll(&mut self, key: PendingKey, token: CancellationToken) {
        if let Some((evicted, token)) = self.polls.insert(key, token) {
            tracing::debug!(context = %evicted.0, ticker = %evicted.1, "Evicted pending poll");
            token.cancel();
        }
    }

    fn settle(&mut self, key: &PendingKey) -> bool {
        let timeout = self.timeouts.remove(key);
        let poll = self.polls.remove(key);
        let had_any = timeout.is_some() || poll.is_some();
        for token in timeout.into_iter().chain(poll) {
            token.cancel();
        }
        had_any
    }
}

/// Supervises refresh-pending cards until they settle or time out.
#[derive(Debug)]
pub struct PendingRefreshSupervisor {
    config: PendingConfig,
    trackers: Arc<Mutex<Trackers>>,
    root: CancellationToken,
}

impl PendingRefreshSupervisor {
    /// Create a supervisor whose tasks are children of `root`.
    #[must_use]
    pub fn new(config: PendingConfig, root: CancellationToken) -> Self {
        let trackers = Trackers {
            timeouts: LruCache::new(config.capacity),
            polls: LruCache::new(config.capacity),
        };
        Self {
            config,
            trackers: Arc::new(Mutex::new(trackers)),
            root,
        }
    }

    /// Supervisor configuration.
    #[must_use]
    pub const fn config(&self) -> &PendingConfig {
        &self.config
    }

    /// Arm the timeout and poll loop for `key`, whichever is not yet running.
    ///
    /// `poll` is invoked once per interval; `on_timeout` runs at most once if
    /// the key is still pending when the timeout elapses.
    pub fn arm<P, Fut, T>(&self, key: PendingKey, poll: P, on_timeout: T) -> ArmOutcome
    where
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PollVerdict> + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        if self.root.is_cancelled() {
            return ArmOutcome::default();
        }

        let mut outcome = ArmOutcome::default();
        let mut trackers = self.trackers.lock();

        if !trackers.timeouts.contains(&key) {
            let token = self.root.child_token();
            trackers.track_timeout(key.clone(), token.clone());
            self.spawn_timeout(key.clone(), token, on_timeout);
            outcome.timeout_armed = true;
        }

        if !trackers.polls.contains(&key) {
            let token = self.root.child_token();
            trackers.track_poll(key.clone(), token.clone());
            self.spawn_poll(key.clone(), token, poll);
            outcome.poll_armed = true;
        }
        drop(trackers);

        if outcome.armed_anything() {
            tracing::debug!(
                context = %key.0,
                ticker = %key.1,
                timeout = outcome.timeout_armed,
                poll = outcome.poll_armed,
                "Pending refresh armed"
            );
        }
        outcome
    }

    /// The card for `key` settled: cancel its timeout and poll loop.
    pub fn settle(&self, key: &PendingKey) -> bool {
        let settled = self.trackers.lock().settle(key);
        if settled {
            tracing::debug!(context = %key.0, ticker = %key.1, "Pending refresh settled");
        }
        settled
    }

    /// Whether `key` has a timeout and/or poll loop armed.
    #[must_use]
    pub fn armed(&self, key: &PendingKey) -> (bool, bool) {
        let trackers = self.trackers.lock();
        (trackers.timeouts.contains(key), trackers.polls.contains(key))
    }

    /// Number of keys with an armed timeout.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.trackers.lock().timeouts.len()
    }

    /// Cancel everything owned by `context`.
    pub fn cancel_context(&self, context: &ContextId) -> usize {
        let mut trackers = self.trackers.lock();
        let timeouts = trackers.timeouts.drain_where(|key, _| &key.0 == context);
        let polls = trackers.polls.drain_where(|key, _| &key.0 == context);
        drop(trackers);

        let cancelled = timeouts.len().max(polls.len());
        for (_, token) in timeouts.into_iter().chain(polls) {
            token.cancel();
        }
        cancelled
    }

    /// Cancel every timer and poll loop.
    pub fn shutdown(&self) {
        self.root.cancel();
        let mut trackers = self.trackers.lock();
        for (_, token) in trackers.timeouts.drain().into_iter().chain(trackers.polls.drain()) {
            token.cancel();
        }
    }

    fn spawn_timeout<T>(&self, key: PendingKey, token: CancellationToken, on_timeout: T)
    where
        T: FnOnce() + Send + 'static,
    {
        let trackers = Arc::clone(&self.trackers);
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let fired = {
                        let mut trackers = trackers.lock();
                        if token.is_cancelled() {
                            false
                        } else {
                            trackers.settle(&key);
                            true
                        }
                    };
                    if fired {
                        tracing::warn!(
                            context = %key.0,
                            ticker = %key.1,
                            timeout_secs = timeout.as_secs_f64(),
                            "Pending refresh timed out"
                        );
                        metrics::record_pending_timeout();
                        on_timeout();
                    }
                }
            }
        });
    }

    fn spawn_poll<P, Fut>(&self, key: PendingKey, token: CancellationToken, poll: P)
    where
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PollVerdict> + Send + 'static,
    {
        let trackers = Arc::clone(&self.trackers);
        let interval = self.config.poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                let verdict = poll().await;
                if token.is_cancelled() {
                    break;
                }

                match verdict {
                    PollVerdict::Pending => {}
                    PollVerdict::Settled => {
                        trackers.lock().settle(&key);
                        break;
                    }
                    PollVerdict::Stop => {
                        let mut trackers = trackers.lock();
                        if !token.is_cancelled() {
                            trackers.polls.remove(&key);
                        }
                        tracing::debug!(
                            context = %key.0,
                            ticker = %key.1,
                            "Pending poll stopped after non-retryable error"
                        );
                        break;
                    }
                }
            }
        });
    }
}

impl Drop for PendingRefreshSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
