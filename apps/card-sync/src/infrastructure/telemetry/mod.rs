//! OpenTelemetry Tracing Integration
//!
//! Installs the `tracing` subscriber for the synchronizer: an env-filtered fmt
//! layer, plus an OTLP span exporter unless disabled.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable the exporter (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: card-sync)
//! - `RUST_LOG`: extra filter directives
//!
//! ```ignore
//! let _guard = card_sync::infrastructure::telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "card-sync";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Directives layered on top of `RUST_LOG`.
const DEFAULT_DIRECTIVES: [&str; 4] = ["card_sync=info", "reqwest=warn", "hyper=warn", "h2=warn"];

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether the OTLP exporter is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("OTEL_ENABLED").is_none_or(|v| !v.trim().eq_ignore_ascii_case("false"));

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name = lookup("OTEL_SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

fn env_filter() -> EnvFilter {
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

/// Initialize telemetry with configuration from the environment.
///
/// The returned guard must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// An exporter that cannot be built degrades to log-only output.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        match opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
        {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                eprintln!("Failed to create OTLP exporter, exporting disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let Some(exporter) = exporter else {
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();
        return TelemetryGuard {
            tracer_provider: None,
        };
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .try_init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}
