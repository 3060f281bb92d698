// Batch Ingestion Adapter
//
// Converts finished traces into Langfuse ingestion events and hands them to a
// BatchDispatcher. Only the export set reaches this adapter, so skipped
// observations and skipped traces never become events.
//
// Event mapping:
// - Trace → trace-create
// - Span → span-create
// - Generation → generation-create
// - Event → event-create
// - ToolCall / Embedding / Agent → observation-create with type TOOL / EMBEDDING / AGENT

use chrono::{DateTime, Utc};
use lineage_core::{
    ExportError, FinishedTrace, Level, Observation, ObservationPayload, ObservationSink,
    TraceRecord, Usage,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::dispatcher::BatchDispatcher;

/// Ingestion event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum IngestionEvent {
    TraceCreate(TraceBody),
    SpanCreate(ObservationBody),
    GenerationCreate(ObservationBody),
    EventCreate(ObservationBody),
    ObservationCreate(ObservationBody),
}

impl IngestionEvent {
    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TraceCreate(_) => "trace-create",
            Self::SpanCreate(_) => "span-create",
            Self::GenerationCreate(_) => "generation-create",
            Self::EventCreate(_) => "event-create",
            Self::ObservationCreate(_) => "observation-create",
        }
    }

    /// Id of the trace or observation this event describes
    pub fn body_id(&self) -> &str {
        match self {
            Self::TraceCreate(body) => &body.id,
            Self::SpanCreate(body)
            | Self::GenerationCreate(body)
            | Self::EventCreate(body)
            | Self::ObservationCreate(body) => &body.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TraceCreate(body) => body.timestamp,
            Self::SpanCreate(body)
            | Self::GenerationCreate(body)
            | Self::EventCreate(body)
            | Self::ObservationCreate(body) => body.start_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
    pub public: Option<bool>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
}

/// Body shared by every observation create event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBody {
    pub id: String,
    pub trace_id: String,
    /// Only set on observation-create (TOOL, EMBEDDING, AGENT)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub observation_type: Option<String>,
    /// None for top-level observations
    pub parent_observation_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub model_parameters: Option<serde_json::Value>,
    pub usage: Option<UsageBody>,
    pub prompt_name: Option<String>,
    pub prompt_version: Option<u32>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub level: Level,
    pub status_message: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBody {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub total: Option<u64>,
    pub unit: Option<String>,
}

impl From<&Usage> for UsageBody {
    fn from(usage: &Usage) -> Self {
        Self {
            input: usage.input,
            output: usage.output,
            total: usage.total,
            unit: Some("TOKENS".to_string()),
        }
    }
}

// ============================================================================
// Conversion
// ============================================================================

fn metadata_value(metadata: BTreeMap<String, serde_json::Value>) -> Option<serde_json::Value> {
    if metadata.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(metadata.into_iter().collect()))
    }
}

fn trace_event(trace: &TraceRecord) -> IngestionEvent {
    let mut metadata = trace.metadata.clone();
    if trace.level != Level::Default {
        metadata.insert("level".to_string(), serde_json::json!(trace.level));
    }

    IngestionEvent::TraceCreate(TraceBody {
        id: trace.id.clone(),
        timestamp: trace.start_time,
        name: Some(trace.name.clone()),
        user_id: trace.user_id.clone(),
        session_id: trace.session_id.clone(),
        release: trace.release.clone(),
        version: trace.version.clone(),
        environment: trace.environment.clone(),
        metadata: metadata_value(metadata),
        tags: if trace.tags.is_empty() {
            None
        } else {
            Some(trace.tags.clone())
        },
        public: trace.public,
        input: trace.input.clone(),
        output: trace.output.clone(),
    })
}

fn observation_event(obs: &Observation, environment: Option<&String>) -> IngestionEvent {
    let mut metadata = obs.metadata.clone();
    let mut body = ObservationBody {
        id: obs.id.clone(),
        trace_id: obs.trace_id.clone(),
        observation_type: None,
        parent_observation_id: (!obs.is_top_level()).then(|| obs.parent_id.clone()),
        name: obs.name.clone(),
        start_time: obs.start_time,
        end_time: obs.end_time,
        model: obs.payload.model().map(str::to_string),
        input: obs.input.clone(),
        output: obs.output.clone(),
        level: obs.level,
        status_message: obs.status_message.clone(),
        version: obs.version.clone(),
        environment: environment.cloned(),
        ..Default::default()
    };

    let mut insert = |key: &str, value: Option<serde_json::Value>| {
        if let Some(value) = value {
            metadata.insert(key.to_string(), value);
        }
    };

    let wrap: fn(ObservationBody) -> IngestionEvent = match &obs.payload {
        ObservationPayload::Span(details) => {
            insert("span_type", details.span_type.clone().map(Into::into));
            insert("description", details.description.clone().map(Into::into));
            IngestionEvent::SpanCreate
        }
        ObservationPayload::Generation(details) => {
            insert("provider", details.provider.clone().map(Into::into));
            body.model_parameters = metadata_value(details.model_parameters.clone());
            body.usage = details.usage.as_ref().map(UsageBody::from);
            body.completion_start_time = details.completion_start_time;
            body.prompt_name = details.prompt_name.clone();
            body.prompt_version = details.prompt_version;
            IngestionEvent::GenerationCreate
        }
        ObservationPayload::Event => IngestionEvent::EventCreate,
        ObservationPayload::ToolCall(details) => {
            insert("tool_name", Some(details.tool_name.clone().into()));
            insert("tool_type", Some(details.tool_type.clone().into()));
            insert("description", details.description.clone().map(Into::into));
            body.observation_type = Some("TOOL".to_string());
            IngestionEvent::ObservationCreate
        }
        ObservationPayload::Embedding(details) => {
            insert("provider", details.provider.clone().map(Into::into));
            insert("dimensions", details.dimensions.map(Into::into));
            body.usage = details.usage.as_ref().map(UsageBody::from);
            body.observation_type = Some("EMBEDDING".to_string());
            IngestionEvent::ObservationCreate
        }
        ObservationPayload::Agent(details) => {
            insert("agent_id", Some(details.agent_id.clone().into()));
            insert("description", details.description.clone().map(Into::into));
            body.observation_type = Some("AGENT".to_string());
            IngestionEvent::ObservationCreate
        }
    };

    body.metadata = metadata_value(metadata);
    wrap(body)
}

/// Convert a finished trace into ingestion events, trace first
pub fn to_events(finished: &FinishedTrace) -> Vec<IngestionEvent> {
    let environment = finished.trace.environment.as_ref();
    std::iter::once(trace_event(&finished.trace))
        .chain(
            finished
                .observations
                .iter()
                .map(|obs| observation_event(obs, environment)),
        )
        .collect()
}

/// Sink that turns finished traces into events for a BatchDispatcher
pub struct BatchIngestionAdapter<D: ?Sized> {
    dispatcher: Arc<D>,
}

impl<D: BatchDispatcher + ?Sized> BatchIngestionAdapter<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<D> {
        &self.dispatcher
    }
}

impl<D: BatchDispatcher + ?Sized> ObservationSink for BatchIngestionAdapter<D> {
    fn name(&self) -> &'static str {
        "batch-ingestion"
    }

    fn export(&self, trace: &FinishedTrace) -> Result<(), ExportError> {
        let events = to_events(trace);
        debug!(
            dispatcher = self.dispatcher.name(),
            trace_id = %trace.trace.id,
            events = events.len(),
            "Enqueueing ingestion events"
        );
        for event in events {
            self.dispatcher.enqueue(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InMemoryDispatcher;
    use lineage_core::{SequentialIdGenerator, TraceOptions, Tracer};
    use serde_json::json;

    fn setup() -> (Tracer, Arc<InMemoryDispatcher>) {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let tracer = Tracer::builder()
            .id_generator(SequentialIdGenerator::new("id"))
            .sink(Arc::new(BatchIngestionAdapter::new(dispatcher.clone())))
            .build();
        (tracer, dispatcher)
    }

    #[test]
    fn test_trace_event_comes_first() {
        let (tracer, dispatcher) = setup();
        let mut ctx = tracer.start_trace(TraceOptions::new("chat").user_id("u-1").tag("prod"));
        ctx.span("step").start().unwrap();
        ctx.end();

        let events = dispatcher.pending();
        assert_eq!(events.len(), 2);

        match &events[0] {
            IngestionEvent::TraceCreate(body) => {
                assert_eq!(body.id, "id-1");
                assert_eq!(body.name.as_deref(), Some("chat"));
                assert_eq!(body.user_id.as_deref(), Some("u-1"));
                assert_eq!(body.tags, Some(vec!["prod".to_string()]));
            }
            other => panic!("Expected TraceCreate event, got {:?}", other),
        }
        assert_eq!(events[1].event_type(), "span-create");
    }

    #[test]
    fn test_event_types_per_kind() {
        let (tracer, dispatcher) = setup();
        let mut ctx = tracer.start_trace(TraceOptions::new("kinds"));
        ctx.span("s").start().unwrap();
        ctx.generation("g", "gpt-4o").start().unwrap();
        ctx.event("e").start().unwrap();
        ctx.tool_call("t", "search").start().unwrap();
        ctx.embedding("m", "text-embedding-3-small").start().unwrap();
        ctx.agent("a", "planner").start().unwrap();
        ctx.end();

        let types: Vec<&str> = dispatcher
            .pending()
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            types,
            vec![
                "trace-create",
                "span-create",
                "generation-create",
                "event-create",
                "observation-create",
                "observation-create",
                "observation-create",
            ]
        );
    }

    #[test]
    fn test_generation_body_fields() {
        let (tracer, dispatcher) = setup();
        let mut ctx = tracer.start_trace(TraceOptions::new("gen"));
        let generation = ctx
            .generation("chat", "gpt-4o")
            .model_parameter("temperature", 0.7)
            .input(json!([{"role": "user", "content": "hi"}]))
            .start()
            .unwrap();
        generation.set_usage(Usage::tokens(12, 8));
        generation.set_output("hello");
        ctx.end();

        let events = dispatcher.pending();
        let body = match &events[1] {
            IngestionEvent::GenerationCreate(body) => body,
            other => panic!("Expected GenerationCreate event, got {:?}", other),
        };
        assert_eq!(body.model.as_deref(), Some("gpt-4o"));
        assert_eq!(body.model_parameters, Some(json!({"temperature": 0.7})));
        assert_eq!(body.usage.as_ref().unwrap().total, Some(20));
        assert_eq!(body.output, Some(json!("hello")));
        assert!(body.parent_observation_id.is_none());
    }

    #[test]
    fn test_observation_create_serializes_type_and_null_parent() {
        let (tracer, dispatcher) = setup();
        let mut ctx = tracer.start_trace(TraceOptions::new("tool"));
        ctx.tool_call("lookup", "search").start().unwrap();
        ctx.end();

        let value = serde_json::to_value(&dispatcher.pending()[1]).unwrap();
        assert_eq!(value["type"], "observation-create");
        assert_eq!(value["body"]["type"], "TOOL");
        assert_eq!(value["body"]["parentObservationId"], serde_json::Value::Null);
        assert_eq!(value["body"]["level"], "DEFAULT");
        assert_eq!(value["body"]["metadata"]["tool_name"], "search");
    }

    #[test]
    fn test_nested_parent_is_kept() {
        let (tracer, dispatcher) = setup();
        let mut ctx = tracer.start_trace(TraceOptions::new("nested"));
        let outer = ctx.span("outer").start_scoped().unwrap();
        ctx.event("inner").start().unwrap();
        let outer_id = outer.id().to_string();
        drop(outer);
        ctx.end();

        let events = dispatcher.pending();
        match &events[2] {
            IngestionEvent::EventCreate(body) => {
                assert_eq!(body.parent_observation_id.as_deref(), Some(outer_id.as_str()));
            }
            other => panic!("Expected EventCreate event, got {:?}", other),
        }
    }

    #[test]
    fn test_skipped_items_never_enqueued() {
        let (tracer, dispatcher) = setup();

        let mut ctx = tracer.start_trace(TraceOptions::new("partial"));
        let skipped = ctx.span("noise").start().unwrap();
        skipped.skip();
        ctx.event("kept").start().unwrap();
        ctx.end();

        let ids: Vec<String> = dispatcher
            .pending()
            .iter()
            .map(|e| e.body_id().to_string())
            .collect();
        assert!(!ids.contains(&skipped.id().to_string()));
        assert_eq!(ids.len(), 2);

        let mut ctx = tracer.start_trace(TraceOptions::new("dropped"));
        ctx.span("anything").start().unwrap();
        ctx.skip_trace();
        ctx.end();

        assert_eq!(dispatcher.pending().len(), 2);
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = IngestionEvent::EventCreate(ObservationBody {
            id: "e-1".to_string(),
            trace_id: "t-1".to_string(),
            name: "marker".to_string(),
            start_time: Utc::now(),
            level: Level::Warning,
            ..Default::default()
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: IngestionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
