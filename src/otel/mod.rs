//! OpenTelemetry integration for api-guard
//!
//! This module provides observability through OpenTelemetry, including
//! tracing, metrics, and optional export to OTLP endpoints.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// OpenTelemetry provider for api-guard
///
/// Manages tracing and metrics providers with OTLP export capability.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;

            (Some(tracer_provider), meter_provider)
        } else {
            // No reader attached, instruments record into nothing
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let trace_config = Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone());

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config)
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown the OpenTelemetry providers gracefully
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Authentication metrics
///
/// Counters and histograms describing the outcome of every gate decision.
#[derive(Clone)]
pub struct AuthMetrics {
    /// Gate decisions by outcome
    pub decisions_total: Counter<u64>,

    /// Failed best-effort last-used writes
    pub last_used_write_failures_total: Counter<u64>,

    /// Secret verification duration in seconds
    pub verify_duration: Histogram<f64>,
}

impl AuthMetrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        let decisions_total = meter
            .u64_counter("api_guard_auth_decisions_total")
            .with_description("Authentication decisions by outcome")
            .init();

        let last_used_write_failures_total = meter
            .u64_counter("api_guard_last_used_write_failures_total")
            .with_description("Failed last-used timestamp writes")
            .init();

        let verify_duration = meter
            .f64_histogram("api_guard_verify_duration_seconds")
            .with_description("Token verification duration in seconds")
            .init();

        Self {
            decisions_total,
            last_used_write_failures_total,
            verify_duration,
        }
    }

    /// Metrics bound to the process-global meter provider
    ///
    /// Records into a no-op provider until one is installed.
    pub fn global() -> Self {
        Self::new(&global::meter("api-guard"))
    }

    /// Record one gate decision
    pub fn record_decision(&self, outcome: &'static str) {
        self.decisions_total
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    /// Record a failed last-used write
    pub fn record_last_used_failure(&self) {
        self.last_used_write_failures_total.add(1, &[]);
    }

    /// Record verification duration
    pub fn record_verify_duration(&self, duration_secs: f64) {
        self.verify_duration.record(duration_secs, &[]);
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize tracing subscriber with OpenTelemetry integration
///
/// `logging.format` selects JSON output (the default) or human-readable
/// "pretty" output.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(parse_level(&logging.level));
    let json = !logging.format.eq_ignore_ascii_case("pretty");

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("api-guard")));
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> OtelConfig {
        OtelConfig {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: "test-service".to_string(),
        }
    }

    // Test 1: OtelProvider initialization with disabled config
    #[test]
    fn test_otel_provider_disabled() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        assert!(!provider.is_enabled());
        assert!(provider.tracer_provider.is_none());
    }

    // Test 2: OtelProvider requires endpoint when enabled
    #[test]
    fn test_otel_provider_requires_endpoint_when_enabled() {
        let config = OtelConfig {
            enabled: true,
            ..disabled_config()
        };

        match OtelProvider::new(&config) {
            Err(OtelError::Config(msg)) => assert!(msg.contains("endpoint is required")),
            _ => panic!("Expected OtelError::Config"),
        }
    }

    // Test 3: AuthMetrics records every outcome without panicking
    #[test]
    fn test_auth_metrics_record() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        let metrics = AuthMetrics::new(&provider.meter());

        for outcome in ["admitted", "missing_token", "rate_limited"] {
            metrics.record_decision(outcome);
        }
        metrics.record_last_used_failure();
        metrics.record_verify_duration(0.02);
    }

    // Test 4: Global metrics are usable without an installed provider
    #[test]
    fn test_auth_metrics_global() {
        let metrics = AuthMetrics::global();
        metrics.record_decision("admitted");
    }

    // Test 5: Provider shutdown
    #[test]
    fn test_otel_provider_shutdown() {
        let provider = OtelProvider::new(&disabled_config()).unwrap();
        assert!(provider.shutdown().is_ok());
    }

    // Test 6: Level parsing falls back to info
    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    // Test 7: OtelError display
    #[test]
    fn test_otel_error_display() {
        let err = OtelError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");

        let err = OtelError::Shutdown("shutdown error".to_string());
        assert_eq!(err.to_string(), "Failed to shutdown: shutdown error");
    }
}
