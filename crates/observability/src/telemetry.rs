// Telemetry Initialization
//
// Process-wide logging plus OpenTelemetry export:
// - console fmt layer filtered by EnvFilter
// - with the `otel` feature and an OTLP endpoint, a tracing-opentelemetry
//   layer exporting the process's own tracing spans over gRPC
// - a Langfuse OTLP/HTTP tracer provider (Basic auth) that can back a
//   SpanExportAdapter, so finished traces land in Langfuse as spans

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
#[cfg(feature = "otel")]
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
#[cfg(feature = "otel")]
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[cfg(feature = "otel")]
use crate::config::IngestionConfig;
#[cfg(feature = "otel")]
use crate::dispatcher::ObservabilityError;

const DEFAULT_SERVICE_NAME: &str = "lineage";

/// Export timeout for both OTLP exporters
#[cfg(feature = "otel")]
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for process telemetry
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP gRPC endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Deployment environment (e.g., "production")
    pub environment: Option<String>,
    pub enable_console: bool,
    /// EnvFilter directives (e.g., "info", "lineage_core=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "lineage")
    /// - `OTEL_SERVICE_VERSION`: Service version
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint
    /// - `OTEL_ENVIRONMENT`: Deployment environment
    /// - `RUST_LOG`, then `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `var`
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        Self {
            service_name: non_empty("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_version: non_empty("OTEL_SERVICE_VERSION"),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
            environment: non_empty("OTEL_ENVIRONMENT"),
            enable_console: true,
            log_filter: non_empty("RUST_LOG").or_else(|| non_empty("LOG_LEVEL")),
        }
    }

    /// Log filter; invalid directives fall back to "info"
    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }

    #[cfg(feature = "otel")]
    fn resource(&self) -> Resource {
        let mut attrs = vec![KeyValue::new("service.name", self.service_name.clone())];
        if let Some(version) = &self.service_version {
            attrs.push(KeyValue::new("service.version", version.clone()));
        }
        if let Some(environment) = &self.environment {
            attrs.push(KeyValue::new("deployment.environment", environment.clone()));
        }
        Resource::builder().with_attributes(attrs).build()
    }
}

/// Guard that shuts down the tracer provider when dropped
///
/// Keep it alive for the lifetime of the process.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether an OTLP exporter is attached
    pub fn is_exporting(&self) -> bool {
        #[cfg(feature = "otel")]
        {
            self.provider.is_some()
        }
        #[cfg(not(feature = "otel"))]
        {
            false
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {:?}", e);
            }
        }
    }
}

/// Install the global tracing subscriber
///
/// If a global subscriber is already installed the call leaves it in place
/// and only returns the guard.
///
/// ```ignore
/// let _guard = init_telemetry(TelemetryConfig::from_env());
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console_layer = config.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(config.filter())
    });

    #[cfg(feature = "otel")]
    let (provider, otel_error) = match config.otlp_endpoint.as_ref() {
        Some(_) => match build_tracer_provider(&config) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    #[cfg(feature = "otel")]
    let installed = {
        let otel_layer = provider.as_ref().map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(DEFAULT_SERVICE_NAME))
        });
        tracing_subscriber::registry()
            .with(console_layer)
            .with(otel_layer)
            .try_init()
    };

    #[cfg(not(feature = "otel"))]
    let installed = tracing_subscriber::registry().with(console_layer).try_init();

    if let Err(e) = installed {
        tracing::debug!(error = %e, "Global subscriber already installed; keeping it");
    }

    #[cfg(feature = "otel")]
    match (&config.otlp_endpoint, otel_error) {
        (Some(endpoint), None) => {
            tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
        }
        (Some(endpoint), Some(e)) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Failed to initialize OTLP tracer, continuing without it");
        }
        (None, _) => {
            tracing::debug!("OpenTelemetry tracing disabled: OTEL_EXPORTER_OTLP_ENDPOINT not set");
        }
    }

    TelemetryGuard {
        #[cfg(feature = "otel")]
        provider,
    }
}

/// Build an OTLP (gRPC) tracer provider for the configured endpoint
#[cfg(feature = "otel")]
pub fn build_tracer_provider(
    config: &TelemetryConfig,
) -> Result<SdkTracerProvider, ObservabilityError> {
    let endpoint = config
        .otlp_endpoint
        .as_deref()
        .ok_or_else(|| ObservabilityError::Config("OTLP endpoint not configured".to_string()))?;

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| ObservabilityError::Config(e.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(config.resource())
        .build())
}

/// Build a tracer provider that exports to Langfuse's OTLP/HTTP endpoint
///
/// Spans go as protobuf to `{host}/api/public/otel/v1/traces` with Basic
/// auth from the key pair plus any configured extra headers. Pair it with a
/// `SpanExportAdapter` (optionally filtered) to ship finished traces:
///
/// ```ignore
/// let provider = build_langfuse_tracer_provider(&ingestion, &TelemetryConfig::from_env())?;
/// let adapter = SpanExportAdapter::new(provider.tracer("lineage")).only_gen_ai(true);
/// ```
#[cfg(feature = "otel")]
pub fn build_langfuse_tracer_provider(
    ingestion: &IngestionConfig,
    telemetry: &TelemetryConfig,
) -> Result<SdkTracerProvider, ObservabilityError> {
    if ingestion.public_key.is_empty() || ingestion.secret_key.is_empty() {
        return Err(ObservabilityError::Config(
            "Langfuse public and secret keys are required".to_string(),
        ));
    }

    let exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(ingestion.otlp_traces_url())
        .with_timeout(EXPORT_TIMEOUT)
        .with_headers(ingestion.otlp_export_headers())
        .build()
        .map_err(|e| ObservabilityError::Config(e.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(telemetry.resource())
        .build())
}
