// Backend Adapters for Lineage Traces
//
// This crate ships finished traces from lineage-core to observability backends.
// Key design decisions:
// - Both adapters implement ObservationSink, so the core crate stays backend-agnostic
// - Langfuse batch ingestion goes through the BatchDispatcher trait (HTTP client or in-memory)
// - OpenTelemetry span export is feature-flagged to minimize dependencies
// - Telemetry init (console + OTLP) lives here so binaries get one setup call

pub mod attributes;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod ingestion;
pub mod telemetry;

#[cfg(feature = "otel")]
pub mod span_export;

// Re-exports
pub use client::IngestionClient;
pub use config::{IngestionConfig, ObservabilityConfig};
pub use dispatcher::{BatchDispatcher, InMemoryDispatcher, NoopDispatcher, ObservabilityError};
pub use ingestion::{to_events, BatchIngestionAdapter, IngestionEvent, ObservationBody, TraceBody};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

#[cfg(feature = "otel")]
pub use span_export::SpanExportAdapter;
#[cfg(feature = "otel")]
pub use telemetry::{build_langfuse_tracer_provider, build_tracer_provider};
