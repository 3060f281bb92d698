// Integration tests for OpenTelemetry span export
//
// Uses the SDK's in-memory exporter behind a simple span processor so every
// span is available right after the trace ends.

#![cfg(feature = "otel")]

use lineage_core::{Level, SequentialIdGenerator, TraceOptions, Tracer};
use lineage_observability::span_export::{span_id_for, trace_id_for};
use lineage_observability::SpanExportAdapter;
use opentelemetry::trace::{SpanId, Status, TracerProvider as _};
use opentelemetry_sdk::trace::SdkTracer;
use opentelemetry::Value;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Tracer, InMemorySpanExporter, SdkTracerProvider) {
    setup_with(|adapter| adapter)
}

fn setup_with(
    configure: impl FnOnce(SpanExportAdapter<SdkTracer>) -> SpanExportAdapter<SdkTracer>,
) -> (Tracer, InMemorySpanExporter, SdkTracerProvider) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let adapter = configure(SpanExportAdapter::new(provider.tracer("lineage-test")));
    let tracer = Tracer::builder()
        .id_generator(SequentialIdGenerator::new("obs"))
        .sink(Arc::new(adapter))
        .build();
    (tracer, exporter, provider)
}

fn attrs(span: &SpanData) -> HashMap<String, Value> {
    span.attributes
        .iter()
        .map(|kv| (kv.key.as_str().to_string(), kv.value.clone()))
        .collect()
}

fn by_name<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {}", name))
}

#[test]
fn test_span_tree_mirrors_observation_tree() {
    let (tracer, exporter, _provider) = setup();

    let mut ctx = tracer.start_trace(TraceOptions::new("rag-query").session_id("s-1"));
    let trace_id = ctx.trace_id().unwrap().to_string();
    let (retrieve_id, embed_id, answer_id);
    {
        let retrieve = ctx.span("retrieve").start_scoped().unwrap();
        retrieve_id = retrieve.id().to_string();
        let embed = ctx.embedding("embed", "text-embedding-3-small").start().unwrap();
        embed_id = embed.id().to_string();
        embed.set_dimensions(1536);
        embed.end();
    }
    let answer = ctx.generation("answer", "gpt-4o").provider("openai").start().unwrap();
    answer_id = answer.id().to_string();
    answer.end();
    ctx.end();

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 4);

    let expected_trace_id = trace_id_for(&trace_id);
    assert!(spans
        .iter()
        .all(|s| s.span_context.trace_id() == expected_trace_id));

    let root = by_name(&spans, "rag-query");
    assert_eq!(root.span_context.span_id(), span_id_for(&trace_id));
    assert_eq!(root.parent_span_id, SpanId::INVALID);
    assert_eq!(
        attrs(root).get("langfuse.session.id"),
        Some(&Value::from("s-1"))
    );

    let retrieve = by_name(&spans, "retrieve");
    assert_eq!(retrieve.span_context.span_id(), span_id_for(&retrieve_id));
    assert_eq!(retrieve.parent_span_id, span_id_for(&trace_id));

    let embed = by_name(&spans, "embed");
    assert_eq!(embed.span_context.span_id(), span_id_for(&embed_id));
    assert_eq!(embed.parent_span_id, span_id_for(&retrieve_id));
    let embed_attrs = attrs(embed);
    assert_eq!(
        embed_attrs.get("langfuse.observation.type"),
        Some(&Value::from("embedding"))
    );
    assert_eq!(
        embed_attrs.get("gen_ai.embeddings.dimension.count"),
        Some(&Value::I64(1536))
    );

    let answer = by_name(&spans, "answer");
    assert_eq!(answer.span_context.span_id(), span_id_for(&answer_id));
    assert_eq!(answer.parent_span_id, span_id_for(&trace_id));
    let answer_attrs = attrs(answer);
    assert_eq!(
        answer_attrs.get("gen_ai.request.model"),
        Some(&Value::from("gpt-4o"))
    );
    assert_eq!(
        answer_attrs.get("gen_ai.provider.name"),
        Some(&Value::from("openai"))
    );
}

#[test]
fn test_skipped_observations_are_not_emitted() {
    let (tracer, exporter, _provider) = setup();

    let mut ctx = tracer.start_trace(TraceOptions::new("with-noise"));
    {
        let noisy = ctx.span("noisy").start_scoped().unwrap();
        ctx.event("inner").start().unwrap();
        noisy.skip();
    }
    ctx.span("kept").start().unwrap().end();
    ctx.end();

    let spans = exporter.get_finished_spans().unwrap();
    let names: Vec<&str> = spans.iter().map(|s| s.name.as_ref()).collect();
    assert_eq!(spans.len(), 2);
    assert!(names.contains(&"with-noise"));
    assert!(names.contains(&"kept"));
}

#[test]
fn test_skipped_trace_emits_nothing() {
    let (tracer, exporter, _provider) = setup();

    let mut ctx = tracer.start_trace(TraceOptions::new("ignored"));
    ctx.span("work").start().unwrap();
    ctx.skip_trace();
    ctx.end();

    assert!(exporter.get_finished_spans().unwrap().is_empty());
}

#[test]
fn test_error_level_sets_span_status() {
    let (tracer, exporter, _provider) = setup();

    let mut ctx = tracer.start_trace(TraceOptions::new("tooling"));
    let tool = ctx.tool_call("fetch", "http_get").start().unwrap();
    tool.fail("connection reset");
    tool.end();
    ctx.span("fine").start().unwrap().end();
    ctx.end();

    let spans = exporter.get_finished_spans().unwrap();

    let fetch = by_name(&spans, "fetch");
    assert_eq!(fetch.status, Status::error("connection reset"));
    let fetch_attrs = attrs(fetch);
    assert_eq!(
        fetch_attrs.get("langfuse.observation.level"),
        Some(&Value::from(Level::Error.as_str()))
    );
    assert_eq!(
        fetch_attrs.get("gen_ai.tool.name"),
        Some(&Value::from("http_get"))
    );

    assert!(!matches!(by_name(&spans, "fine").status, Status::Error { .. }));
}

#[test]
fn test_only_gen_ai_drops_plain_spans_and_reparents() {
    let (tracer, exporter, _provider) = setup_with(|adapter| adapter.only_gen_ai(true));

    let mut ctx = tracer.start_trace(TraceOptions::new("chat-turn"));
    let trace_id = ctx.trace_id().unwrap().to_string();
    {
        let _step = ctx.span("handle-request").start_scoped().unwrap();
        ctx.event("cache-miss").start().unwrap();
        let answer = ctx.generation("answer", "gpt-4o").start().unwrap();
        answer.end();
    }
    ctx.end();

    let spans = exporter.get_finished_spans().unwrap();
    let names: Vec<&str> = spans.iter().map(|s| s.name.as_ref()).collect();
    assert_eq!(names.len(), 2, "got {:?}", names);
    assert!(names.contains(&"chat-turn"));

    let answer = by_name(&spans, "answer");
    assert_eq!(answer.parent_span_id, span_id_for(&trace_id));
}

#[test]
fn test_custom_filter_predicate() {
    let (tracer, exporter, _provider) =
        setup_with(|adapter| adapter.with_filter(|obs| !obs.name.starts_with("debug-")));

    let mut ctx = tracer.start_trace(TraceOptions::new("pipeline"));
    let trace_id = ctx.trace_id().unwrap().to_string();
    let keep_id;
    {
        let _debug = ctx.span("debug-dump").start_scoped().unwrap();
        let keep = ctx.tool_call("fetch", "http_get").start().unwrap();
        keep_id = keep.id().to_string();
        keep.end();
    }
    ctx.span("store").start().unwrap().end();
    ctx.end();

    let spans = exporter.get_finished_spans().unwrap();
    let names: Vec<&str> = spans.iter().map(|s| s.name.as_ref()).collect();
    assert_eq!(spans.len(), 3, "got {:?}", names);
    assert!(!names.contains(&"debug-dump"));

    let fetch = by_name(&spans, "fetch");
    assert_eq!(fetch.span_context.span_id(), span_id_for(&keep_id));
    assert_eq!(fetch.parent_span_id, span_id_for(&trace_id));
}
