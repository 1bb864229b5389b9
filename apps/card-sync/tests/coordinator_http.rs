//! Coordinator Integration Tests
//!
//! Drives the card coordinator through the real HTTP adapter against a
//! mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use card_sync::domain::treatment::TreatmentKind;
use card_sync::{
    CardCoordinator, ContextId, FetchOptions, FetchSource, InstrumentKey, MessageStatus,
    RenderIntent, SyncError,
};
use common::{API_KEY, RecordingSink, backend, coordinator_config, ready_payload};

fn user() -> FetchOptions {
    FetchOptions::new(FetchSource::User, RenderIntent::Open)
}

fn setup(server: &MockServer) -> (Arc<CardCoordinator>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = CardCoordinator::new(backend(&server.uri()), sink.clone(), coordinator_config());
    (coordinator, sink)
}

#[tokio::test]
async fn revalidation_reuses_cached_card_on_304() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .and(header("X-API-Key", API_KEY))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ready_payload(800.0, 3))
                .insert_header("ETag", "\"v1\""),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let ctx = ContextId::new("chat-1");

    let first = coordinator.fetch_and_render(&ctx, "$nvda", user()).await.unwrap().unwrap();
    let second = coordinator.fetch_and_render(&ctx, "NVDA", user()).await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        coordinator.cached_etag(&InstrumentKey::normalize("NVDA").unwrap()).as_deref(),
        Some("\"v1\"")
    );
    let renders = sink.renders.lock();
    assert_eq!(renders.len(), 2);
    assert_eq!(renders[1].2.kind(), TreatmentKind::Ready);
}

#[tokio::test]
async fn rate_limited_fetch_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_payload(800.0, 1)))
        .mount(&server)
        .await;

    let (coordinator, _sink) = setup(&server);
    let vm = coordinator
        .fetch_and_render(&ContextId::new("chat-1"), "NVDA", user())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(vm.cards.snapshot.data.as_ref().unwrap().price, Some(800.0));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_unavailable_response_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let err = coordinator
        .fetch_and_render(&ContextId::new("chat-1"), "NVDA", user())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::BackendUnavailable { status: 503, .. }));
    assert!(sink.renders.lock().is_empty());
}

#[tokio::test]
async fn concurrent_fetches_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ready_payload(800.0, 1))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let a = ContextId::new("chat-a");
    let b = ContextId::new("chat-b");

    let (first, second) = tokio::join!(
        coordinator.fetch_and_render(&a, "NVDA", user()),
        coordinator.fetch_and_render(&b, "nvda", user()),
    );

    let fetched = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(fetched, 1);
    assert_eq!(sink.renders.lock().len(), 1);
}

#[tokio::test]
async fn triggered_refresh_merges_prior_snapshot_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_payload(800.0, 3)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/card/NVDA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ticker": "NVDA",
            "card": {"header": {"current_price": 805.0}},
            "status": {"version": 4},
            "refresh_triggered": true,
            "errors": [],
        })))
        .mount(&server)
        .await;

    let (coordinator, _sink) = setup(&server);
    let ctx = ContextId::new("chat-1");
    coordinator.fetch_and_render(&ctx, "NVDA", user()).await.unwrap();
    let merged = coordinator.fetch_and_render(&ctx, "NVDA", user()).await.unwrap().unwrap();

    let snapshot = merged.cards.snapshot.data.as_ref().unwrap();
    assert_eq!(snapshot.price, Some(805.0));
    assert_eq!(snapshot.volume, Some(1_250_000.0));
    assert_eq!(snapshot.session_open, Some(780.0));
    assert!(!merged.cards.snapshot.missing.has_key("snapshot.volume"));

    coordinator.shutdown();
}

#[tokio::test]
async fn missing_ticker_renders_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card/ZZZZ"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let vm = coordinator
        .fetch_and_render(&ContextId::new("chat-1"), "zzzz", user())
        .await
        .unwrap()
        .unwrap();

    assert!(vm.is_not_found());
    let renders = sink.renders.lock();
    assert_eq!(renders[0].2.kind(), TreatmentKind::NotFound);
    assert!(!renders[0].2.refresh_pending());
}

#[tokio::test]
async fn invalid_ticker_never_reaches_backend() {
    let server = MockServer::start().await;
    let (coordinator, sink) = setup(&server);

    let err = coordinator
        .fetch_and_render(&ContextId::new("chat-1"), "not a ticker", user())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.status, MessageStatus::Error);
}

#[tokio::test]
async fn analysis_request_acknowledges_and_arms_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze/AMD"))
        .and(header("X-API-Key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "enqueued": true,
            "deduped": false,
            "errors": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let ctx = ContextId::new("chat-1");
    let ack = coordinator.request_analysis(&ctx, "amd").await.unwrap();

    assert!(ack.enqueued);
    assert_eq!(sink.message_texts(), vec!["Queued a fresh analysis for $AMD.".to_string()]);
    let key = (ctx, InstrumentKey::normalize("AMD").unwrap());
    assert_eq!(coordinator.pending().armed(&key), (true, true));

    coordinator.shutdown();
}

#[tokio::test]
async fn pin_of_unknown_ticker_posts_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pin/ZZZZ"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (coordinator, sink) = setup(&server);
    let err = coordinator
        .pin(&ContextId::new("chat-1"), "ZZZZ")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound(_)));
    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.status, MessageStatus::Error);
    assert!(messages[0].1.content.contains("$ZZZZ"));
}
