//! Watchlist Rotation
//!
//! Stream follow-ups and the fallback poller only track the active context.
//! A headless run with several watched tickers keeps one context per ticker
//! and hands the active slot to each in turn, revalidating the card it lands
//! on so updates missed while inactive are picked up.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::coordinator::{CardCoordinator, FetchOptions, FetchSource};
use crate::domain::instrument::{ContextId, InstrumentKey};
use crate::domain::treatment::RenderIntent;

/// Cycles the active context over a fixed set of watched contexts.
#[derive(Debug)]
pub struct WatchlistRotation {
    coordinator: Arc<CardCoordinator>,
    entries: Vec<(ContextId, InstrumentKey)>,
    interval: Duration,
}

impl WatchlistRotation {
    /// Rotation over `entries`, advancing every `interval`.
    #[must_use]
    pub const fn new(
        coordinator: Arc<CardCoordinator>,
        entries: Vec<(ContextId, InstrumentKey)>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            entries,
            interval,
        }
    }

    /// Watched contexts.
    #[must_use]
    pub fn entries(&self) -> &[(ContextId, InstrumentKey)] {
        &self.entries
    }

    /// Rotate until `cancel` fires. Returns at once with fewer than two entries.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.entries.len() < 2 {
            return;
        }

        let mut next = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.interval) => {}
            }

            let (context, key) = &self.entries[next];
            next = (next + 1) % self.entries.len();
            self.coordinator.activate(context);
            tracing::debug!(context = %context, ticker = %key, "Watchlist rotated");

            let options = FetchOptions::new(FetchSource::Watchlist, RenderIntent::Update);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.coordinator.fetch_and_render(context, key.as_str(), options) => result,
            };
            if let Err(err) = result {
                tracing::debug!(context = %context, ticker = %key, error = %err, "Watchlist revalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CardBackend, CardResponse, CardSink, ChatMessage, EnqueueAck};
    use crate::application::services::CoordinatorConfig;
    use crate::domain::card::CardViewModel;
    use crate::domain::treatment::DisplayTreatment;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct EchoBackend {
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CardBackend for EchoBackend {
        async fn fetch_card(
            &self,
            ticker: &InstrumentKey,
            _etag: Option<&str>,
            _cancel: &CancellationToken,
        ) -> Result<CardResponse, SyncError> {
            self.fetched.lock().push(ticker.to_string());
            Ok(CardResponse::Fresh {
                payload: json!({
                    "ticker": ticker.as_str(),
                    "card": {"header": {"current_price": 10.0}},
                    "errors": [],
                }),
                etag: None,
            })
        }

        async fn analyze(
            &self,
            _ticker: &InstrumentKey,
            _cancel: &CancellationToken,
        ) -> Result<EnqueueAck, SyncError> {
            Ok(EnqueueAck::default())
        }

        async fn pin(
            &self,
            _ticker: &InstrumentKey,
            _cancel: &CancellationToken,
        ) -> Result<EnqueueAck, SyncError> {
            Ok(EnqueueAck::default())
        }
    }

    struct NullSink;

    impl CardSink for NullSink {
        fn render_card(&self, _: &ContextId, _: &Arc<CardViewModel>, _: &DisplayTreatment) {}

        fn post_message(&self, _: &ContextId, _: ChatMessage) {}
    }

    async fn watched(
        coordinator: &Arc<CardCoordinator>,
        tickers: &[&str],
    ) -> Vec<(ContextId, InstrumentKey)> {
        let mut entries = Vec::new();
        for ticker in tickers {
            let context = ContextId::new(format!("watch-{ticker}"));
            coordinator.focus(&context, ticker).await.unwrap();
            entries.push((context, InstrumentKey::normalize(ticker).unwrap()));
        }
        entries
    }

    #[tokio::test]
    async fn every_watched_ticker_becomes_active() {
        let backend = Arc::new(EchoBackend::default());
        let coordinator = CardCoordinator::new(
            backend.clone(),
            Arc::new(NullSink),
            CoordinatorConfig {
                cooldown: Duration::ZERO,
                ..CoordinatorConfig::default()
            },
        );
        let entries = watched(&coordinator, &["NVDA", "AMD"]).await;
        let nvda = entries[0].1.clone();
        assert!(!coordinator.is_active_focus(&nvda));
        backend.fetched.lock().clear();

        let rotation = Arc::new(WatchlistRotation::new(
            Arc::clone(&coordinator),
            entries,
            Duration::from_millis(20),
        ));
        let cancel = CancellationToken::new();
        let task = {
            let rotation = Arc::clone(&rotation);
            let cancel = cancel.clone();
            tokio::spawn(async move { rotation.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coordinator.is_active_focus(&nvda));

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        task.await.unwrap();

        let fetched = backend.fetched.lock().clone();
        assert!(fetched.contains(&"NVDA".to_string()));
        assert!(fetched.contains(&"AMD".to_string()));
    }

    #[tokio::test]
    async fn single_entry_does_not_rotate() {
        let backend = Arc::new(EchoBackend::default());
        let coordinator =
            CardCoordinator::new(backend.clone(), Arc::new(NullSink), CoordinatorConfig::default());
        let entries = watched(&coordinator, &["NVDA"]).await;

        let rotation = WatchlistRotation::new(coordinator, entries, Duration::from_millis(1));
        tokio::time::timeout(Duration::from_millis(100), rotation.run(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(backend.fetched.lock().len(), 1);
    }
}
