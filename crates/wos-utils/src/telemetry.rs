/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Telemetry Module
//!
//! OpenTelemetry-based distributed tracing, wired to the `telemetry` section
//! of [`crate::config::Settings`].
//!
//! ## Features
//! - OTLP export to any OpenTelemetry-compatible collector
//! - Integration with the `tracing` crate for instrumentation
//! - Falls back to a plain `tracing-subscriber` when disabled
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wos_utils::telemetry;
//! use wos_utils::config::Telemetry;
//!
//! let config = Telemetry {
//!     enabled: true,
//!     otlp_endpoint: Some("http://localhost:4317".to_string()),
//!     service_name: "wos-core".to_string(),
//! };
//!
//! telemetry::init(&config, "info", "text")?;
//!
//! tracing::info!("application started");
//! ```

use crate::config::Telemetry;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Error type for telemetry initialization.
#[derive(Debug)]
pub enum TelemetryError {
    /// Failed to create OTLP exporter.
    ExporterError(String),
    /// Failed to set global subscriber.
    SubscriberError(String),
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::ExporterError(e) => write!(f, "OTLP exporter error: {}", e),
            TelemetryError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Initializes tracing for the process, with or without OTLP export
/// depending on `config.enabled`.
///
/// # Arguments
/// * `config` - the `[telemetry]` section of `Settings`
/// * `log_level` - fallback level filter when `RUST_LOG` is unset
/// * `log_format` - `"text"` or `"json"`
pub fn init(config: &Telemetry, log_level: &str, log_format: &str) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if !config.enabled {
        let subscriber = tracing_subscriber::registry().with(env_filter);
        return install(subscriber, log_format);
    }

    let endpoint = config
        .otlp_endpoint
        .clone()
        .unwrap_or_else(|| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;

    let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ]))
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(tracer_provider);

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    install(subscriber, log_format)
}

fn install<S>(subscriber: S, log_format: &str) -> Result<(), TelemetryError>
where
    S: tracing::Subscriber + Send + Sync + 'static,
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if log_format.eq_ignore_ascii_case("json") {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TelemetryError::SubscriberError(e.to_string()))
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| TelemetryError::SubscriberError(e.to_string()))
    }
}

/// Flushes pending spans. Call during graceful shutdown.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Re-exports of the tracing macros most call sites need.
pub mod prelude {
    pub use tracing::Instrument;
    pub use tracing::{debug, error, info, trace, warn};
    pub use tracing::{instrument, span, Level};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_telemetry_config() {
        let config = Telemetry {
            enabled: false,
            otlp_endpoint: Some("http://localhost:4317".to_string()),
            service_name: "test-service".to_string(),
        };
        assert!(!config.enabled);
        assert_eq!(config.service_name, "test-service");
    }

    #[test]
    fn test_missing_otlp_endpoint_falls_back() {
        let config = Telemetry {
            enabled: true,
            otlp_endpoint: None,
            service_name: "test-service".to_string(),
        };
        assert!(config.otlp_endpoint.is_none());
    }
}
