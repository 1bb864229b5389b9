//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use card_sync::application::services::PendingConfig;
use card_sync::{
    BackendClientConfig, CardSink, CardViewModel, ChatMessage, ContextId, CoordinatorConfig,
    DisplayTreatment, HttpCardBackend,
};

pub const API_KEY: &str = "test-key";

/// Sink that keeps everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub renders: Mutex<Vec<(ContextId, Arc<CardViewModel>, DisplayTreatment)>>,
    pub messages: Mutex<Vec<(ContextId, ChatMessage)>>,
}

impl RecordingSink {
    pub fn message_texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|(_, m)| m.content.clone())
            .collect()
    }
}

impl CardSink for RecordingSink {
    fn render_card(&self, context: &ContextId, card: &Arc<CardViewModel>, treatment: &DisplayTreatment) {
        self.renders
            .lock()
            .push((context.clone(), Arc::clone(card), treatment.clone()));
    }

    fn post_message(&self, context: &ContextId, message: ChatMessage) {
        self.messages.lock().push((context.clone(), message));
    }
}

pub fn backend(base_url: &str) -> Arc<HttpCardBackend> {
    backend_with_timeout(base_url, Duration::from_secs(2))
}

pub fn backend_with_timeout(base_url: &str, timeout: Duration) -> Arc<HttpCardBackend> {
    Arc::new(
        HttpCardBackend::new(&BackendClientConfig {
            base_url: base_url.to_string(),
            api_key: Some(API_KEY.to_string()),
            timeout,
            stream_path: "/stream/user".to_string(),
        })
        .unwrap(),
    )
}

/// Short timings; pending polls effectively disabled.
pub fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        cooldown: Duration::ZERO,
        retry_after_min: Duration::from_millis(1),
        retry_after_max: Duration::from_millis(50),
        retry_after_default: Duration::from_millis(5),
        pending: PendingConfig {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            capacity: 16,
        },
        ..CoordinatorConfig::default()
    }
}

pub fn ready_payload(price: f64, version: u64) -> Value {
    json!({
        "ticker": "NVDA",
        "card": {
            "summary": "Momentum continuation",
            "header": {
                "name": "NVIDIA Corp",
                "current_price": price,
                "session_open_px": 780.0,
                "prev_close": 775.0,
                "volume": 1_250_000.0,
            },
        },
        "status": {"version": version},
        "is_missing": false,
        "errors": [],
    })
}
