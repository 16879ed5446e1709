//! Logging and trace export initialisation.
//!
//! Call [`init_tracing`] once at process startup, before any work is
//! spawned.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter; overrides the configured level when set. |
//! | `RANGEFUSE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//!
//! # Example
//!
//! ```rust,no_run
//! use rangefuse_runtime::telemetry::{default_directive, init_tracing};
//! use rangefuse_types::LogLevel;
//!
//! let _guard = init_tracing("rangefuse", default_directive(LogLevel::Results));
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use rangefuse_types::LogLevel;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Target under which every emitted fused result is logged.
///
/// Kept at `info` even by the `minimal` directive.
pub const RESULT_TARGET: &str = "rangefuse::result";

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// `EnvFilter` directive for a configured [`LogLevel`].
pub fn default_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Verbose => "debug",
        LogLevel::Results => "info",
        LogLevel::Minimal => "error,rangefuse::result=info",
    }
}

/// Initialise the global `tracing` subscriber with an optional OTLP exporter.
///
/// `RUST_LOG` takes precedence over `directive`.  An unparseable `RUST_LOG`
/// falls back to `directive`.  Hold the returned guard until exit.
pub fn init_tracing(service_name: &str, directive: &str) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let use_json = std::env::var("RANGEFUSE_LOG_FORMAT").as_deref() == Ok("json");

    let endpoint = otlp_endpoint();
    let provider = endpoint.as_deref().map(|url| build_provider(service_name, url));
    let (provider, export_error) = match provider {
        Some(Ok(p)) => (Some(p), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("rangefuse")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(use_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!use_json).then(|| tracing_subscriber::fmt::layer().compact()))
        .init();

    match (&endpoint, &export_error) {
        (Some(url), None) => tracing::info!(endpoint = %url, "Exporting spans over OTLP/HTTP"),
        (Some(url), Some(e)) => tracing::warn!(endpoint = %url, error = %e, "OTLP export disabled"),
        _ => {}
    }

    TelemetryGuard { provider }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Flushes and shuts down the span exporter when dropped.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are leaving the process.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("rangefuse: span exporter shutdown failed: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exporter
// ─────────────────────────────────────────────────────────────────────────────

/// The configured collector URL, ignoring an empty value.
fn otlp_endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

fn build_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider, String> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| e.to_string())?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: `main` builds the Tokio runtime after this runs.
    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build())
}
