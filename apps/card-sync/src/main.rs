//! Card Sync Binary
//!
//! Runs the synchronizer headless: focuses a watchlist, keeps the event
//! stream open and logs every settled card.
//!
//! Each watched ticker gets its own context. Stream follow-ups and fallback
//! polling track the active context, so the active slot rotates across the
//! watchlist and every ticker is revalidated when its turn comes.
//!
//! # Usage
//!
//! ```bash
//! CARD_BACKEND_URL=http://localhost:8000 CARD_WATCHLIST=NVDA,AMD cargo run --bin card-sync
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARD_BACKEND_URL`: Card backend base URL
//!
//! ## Optional
//! - `CARD_BACKEND_API_KEY`: Sent as `X-API-Key`
//! - `CARD_BACKEND_TIMEOUT_MS`: Per-request timeout (default: 10000)
//! - `CARD_WATCHLIST`: Comma-separated tickers focused at startup
//! - `CARD_WATCHLIST_ROTATE_MS`: Time each ticker holds the active context (default: 5000)
//! - `CARD_STREAM_*`, `CARD_CACHE_*`, `CARD_PENDING_*`: see `SyncConfig`
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: card-sync)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use card_sync::infrastructure::telemetry;
use card_sync::{
    CardCoordinator, ContextId, HttpCardBackend, InstrumentKey, StreamSession, SyncConfig,
    TracingCardSink, WatchlistRotation, init_metrics,
};
use tokio::signal;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_ancestors();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting card sync");

    let metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder unavailable");
            None
        }
    };

    let config = SyncConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let backend = Arc::new(
        HttpCardBackend::new(&config.backend_client()).context("building backend client")?,
    );
    let sink = Arc::new(TracingCardSink::new());
    let coordinator = CardCoordinator::new(backend.clone(), sink.clone(), config.coordinator());

    let session = Arc::new(StreamSession::new(
        backend,
        Arc::clone(&coordinator),
        config.stream_session(),
    ));
    let stream_task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    let run_id = Uuid::new_v4();
    let mut watched = Vec::with_capacity(config.watchlist.len());
    for ticker in &config.watchlist {
        let Some(key) = InstrumentKey::normalize(ticker) else {
            tracing::warn!(ticker = %ticker, "Skipping invalid watchlist ticker");
            continue;
        };
        let context = ContextId::new(format!("watch-{run_id}-{key}"));
        if let Err(e) = coordinator.focus(&context, key.as_str()).await {
            tracing::warn!(ticker = %key, error = %e, "Initial fetch failed");
        }
        watched.push((context, key));
    }

    let rotation = WatchlistRotation::new(
        Arc::clone(&coordinator),
        watched,
        config.watchlist_rotation,
    );
    tracing::info!(watchlist = rotation.entries().len(), "Card sync ready");

    let rotation_cancel = coordinator.shutdown_token().child_token();
    let rotation_task = {
        let cancel = rotation_cancel.clone();
        tokio::spawn(async move { rotation.run(cancel).await })
    };

    await_shutdown().await;

    rotation_cancel.cancel();
    session.abort();
    coordinator.shutdown();
    for (name, task) in [("rotation", rotation_task), ("stream", stream_task)] {
        if let Err(e) = task.await {
            tracing::warn!(task = name, error = %e, "Task ended abnormally");
        }
    }

    if let Some(handle) = metrics_handle {
        tracing::debug!(metrics = %handle.render(), "Final metrics");
    }
    tracing::info!(
        rendered = sink.renders().len(),
        messages = sink.message_count(),
        "Card sync stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        backend_url = %config.backend.base_url,
        api_key = config.backend.api_key.is_some(),
        timeout_ms = config.backend.timeout.as_millis() as u64,
        persisted_fallback_upsert = config.backend.persisted_fallback_upsert,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_path = %config.stream.path,
        replay = config.stream.replay,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        fallback_poll_ms = config.stream.fallback_poll_interval.as_millis() as u64,
        cache_capacity = config.cache.capacity,
        pending_timeout_ms = config.pending.timeout.as_millis() as u64,
        "Synchronizer settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
