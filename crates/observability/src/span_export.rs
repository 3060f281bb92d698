// Span Export Adapter
//
// Maps a finished trace onto OpenTelemetry spans and lets the tracer
// provider's own pipeline export them. The trace becomes a root span; each
// exported observation becomes a child span whose parent span id is derived
// from its parent observation id, so the span tree mirrors the observation
// tree no matter in which order spans are emitted.
//
// Id mapping is deterministic: ids that already are 128-bit hex (UUIDs) are
// used as trace ids verbatim, everything else is hashed.
//
// Observations can be filtered out before export (gen-ai only, or a caller
// predicate). The root span is always emitted; a kept observation whose
// parent was filtered out is attached to its nearest emitted ancestor.

use lineage_core::{
    ExportError, FinishedTrace, Level, Observation, ObservationKind, ObservationPayload,
    ObservationSink, TraceRecord,
};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer,
};
use opentelemetry::{Context, KeyValue};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::SystemTime;
use tracing::debug;

use crate::attributes::{self, gen_ai, metadata_key};

fn hash_with(seed: u64, id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish()
}

/// OpenTelemetry trace id for a trace id string
pub fn trace_id_for(id: &str) -> TraceId {
    let hex: String = id.chars().filter(|c| *c != '-').collect();
    if hex.len() == 32 {
        if let Ok(trace_id) = TraceId::from_hex(&hex) {
            if trace_id != TraceId::INVALID {
                return trace_id;
            }
        }
    }

    let high = hash_with(0, id) as u128;
    let low = hash_with(1, id) as u128;
    let value = (high << 64) | low;
    TraceId::from_bytes(value.max(1).to_be_bytes())
}

/// OpenTelemetry span id for an observation (or trace) id string
pub fn span_id_for(id: &str) -> SpanId {
    SpanId::from_bytes(hash_with(2, id).max(1).to_be_bytes())
}

fn json_attribute(key: impl Into<String>, value: &serde_json::Value) -> KeyValue {
    let key = key.into();
    match value {
        serde_json::Value::String(s) => KeyValue::new(key, s.clone()),
        serde_json::Value::Bool(b) => KeyValue::new(key, *b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => KeyValue::new(key, i),
            None => KeyValue::new(key, n.as_f64().unwrap_or_default()),
        },
        other => KeyValue::new(key, other.to_string()),
    }
}

fn metadata_attributes(
    attrs: &mut Vec<KeyValue>,
    prefix: &str,
    metadata: &BTreeMap<String, serde_json::Value>,
) {
    for (key, value) in metadata {
        attrs.push(json_attribute(metadata_key(prefix, key), value));
    }
}

type ExportFilter = Box<dyn Fn(&Observation) -> bool + Send + Sync>;

/// Whether an attribute set describes a gen-ai operation
fn has_gen_ai_attribute(attrs: &[KeyValue]) -> bool {
    attrs
        .iter()
        .any(|kv| kv.key.as_str().starts_with(gen_ai::PREFIX))
}

/// Sink that emits every finished trace as a tree of OpenTelemetry spans
pub struct SpanExportAdapter<T> {
    tracer: T,
    record_content: bool,
    only_gen_ai: bool,
    filter: Option<ExportFilter>,
}

impl<T> SpanExportAdapter<T>
where
    T: Tracer + Send + Sync,
{
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            record_content: true,
            only_gen_ai: false,
            filter: None,
        }
    }

    /// Whether input and output values are written as span attributes
    pub fn with_content(mut self, record_content: bool) -> Self {
        self.record_content = record_content;
        self
    }

    /// Only emit observations carrying `gen_ai.*` attributes
    ///
    /// Plain spans and events are dropped; generations, tool calls,
    /// embeddings and agents are kept.
    pub fn only_gen_ai(mut self, enabled: bool) -> Self {
        self.only_gen_ai = enabled;
        self
    }

    /// Only emit observations for which `filter` returns true
    ///
    /// Applied after `only_gen_ai` when both are set.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Observation) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    fn should_emit(&self, obs: &Observation, attrs: &[KeyValue]) -> bool {
        if self.only_gen_ai && !has_gen_ai_attribute(attrs) {
            return false;
        }
        self.filter.as_ref().map_or(true, |filter| filter(obs))
    }

    fn trace_attributes(&self, trace: &TraceRecord) -> Vec<KeyValue> {
        let mut attrs = vec![
            KeyValue::new(attributes::trace::ID, trace.id.clone()),
            KeyValue::new(attributes::trace::NAME, trace.name.clone()),
        ];
        if let Some(user_id) = &trace.user_id {
            attrs.push(KeyValue::new(attributes::trace::USER_ID, user_id.clone()));
        }
        if let Some(session_id) = &trace.session_id {
            attrs.push(KeyValue::new(attributes::trace::SESSION_ID, session_id.clone()));
            attrs.push(KeyValue::new(gen_ai::CONVERSATION_ID, session_id.clone()));
        }
        if let Some(release) = &trace.release {
            attrs.push(KeyValue::new(attributes::trace::RELEASE, release.clone()));
        }
        if let Some(version) = &trace.version {
            attrs.push(KeyValue::new(attributes::trace::VERSION, version.clone()));
        }
        if let Some(environment) = &trace.environment {
            attrs.push(KeyValue::new(attributes::trace::ENVIRONMENT, environment.clone()));
        }
        if let Some(public) = trace.public {
            attrs.push(KeyValue::new(attributes::trace::PUBLIC, public));
        }
        if !trace.tags.is_empty() {
            attrs.push(KeyValue::new(
                attributes::trace::TAGS,
                serde_json::json!(trace.tags).to_string(),
            ));
        }
        if self.record_content {
            if let Some(input) = &trace.input {
                attrs.push(KeyValue::new(attributes::trace::INPUT, input.to_string()));
            }
            if let Some(output) = &trace.output {
                attrs.push(KeyValue::new(attributes::trace::OUTPUT, output.to_string()));
            }
        }
        metadata_attributes(&mut attrs, attributes::trace::METADATA_PREFIX, &trace.metadata);
        attrs
    }

    fn observation_attributes(&self, obs: &Observation) -> Vec<KeyValue> {
        use attributes::observation as attr;

        let kind = match obs.kind() {
            ObservationKind::Span => attr::kind::SPAN,
            ObservationKind::Generation => attr::kind::GENERATION,
            ObservationKind::Event => attr::kind::EVENT,
            ObservationKind::ToolCall => attr::kind::TOOL,
            ObservationKind::Embedding => attr::kind::EMBEDDING,
            ObservationKind::Agent => attr::kind::AGENT,
        };

        let mut attrs = vec![
            KeyValue::new(attr::ID, obs.id.clone()),
            KeyValue::new(attr::TYPE, kind),
            KeyValue::new(attributes::trace::ID, obs.trace_id.clone()),
        ];
        if obs.level != Level::Default {
            attrs.push(KeyValue::new(attr::LEVEL, obs.level.as_str()));
        }
        if let Some(message) = &obs.status_message {
            attrs.push(KeyValue::new(attr::STATUS_MESSAGE, message.clone()));
        }
        if let Some(version) = &obs.version {
            attrs.push(KeyValue::new(attr::VERSION, version.clone()));
        }
        if self.record_content {
            if let Some(input) = &obs.input {
                attrs.push(KeyValue::new(attr::INPUT, input.to_string()));
            }
            if let Some(output) = &obs.output {
                attrs.push(KeyValue::new(attr::OUTPUT, output.to_string()));
            }
        }
        metadata_attributes(&mut attrs, attr::METADATA_PREFIX, &obs.metadata);

        match &obs.payload {
            ObservationPayload::Span(_) | ObservationPayload::Event => {}
            ObservationPayload::Generation(details) => {
                attrs.push(KeyValue::new(gen_ai::OPERATION_NAME, gen_ai::operation::CHAT));
                attrs.push(KeyValue::new(attr::MODEL_NAME, details.model.clone()));
                attrs.push(KeyValue::new(gen_ai::REQUEST_MODEL, details.model.clone()));
                if let Some(provider) = &details.provider {
                    attrs.push(KeyValue::new(gen_ai::PROVIDER_NAME, provider.clone()));
                }
                if !details.model_parameters.is_empty() {
                    attrs.push(KeyValue::new(
                        attr::MODEL_PARAMETERS,
                        serde_json::json!(details.model_parameters).to_string(),
                    ));
                }
                if let Some(at) = details.completion_start_time {
                    attrs.push(KeyValue::new(attr::COMPLETION_START_TIME, at.to_rfc3339()));
                }
                if let Some(name) = &details.prompt_name {
                    attrs.push(KeyValue::new(attr::PROMPT_NAME, name.clone()));
                }
                if let Some(version) = details.prompt_version {
                    attrs.push(KeyValue::new(attr::PROMPT_VERSION, version as i64));
                }
            }
            ObservationPayload::ToolCall(details) => {
                attrs.push(KeyValue::new(gen_ai::OPERATION_NAME, gen_ai::operation::EXECUTE_TOOL));
                attrs.push(KeyValue::new(gen_ai::TOOL_NAME, details.tool_name.clone()));
                attrs.push(KeyValue::new(gen_ai::TOOL_TYPE, details.tool_type.clone()));
            }
            ObservationPayload::Embedding(details) => {
                attrs.push(KeyValue::new(gen_ai::OPERATION_NAME, gen_ai::operation::EMBEDDINGS));
                attrs.push(KeyValue::new(attr::MODEL_NAME, details.model.clone()));
                attrs.push(KeyValue::new(gen_ai::REQUEST_MODEL, details.model.clone()));
                if let Some(provider) = &details.provider {
                    attrs.push(KeyValue::new(gen_ai::PROVIDER_NAME, provider.clone()));
                }
                if let Some(dimensions) = details.dimensions {
                    attrs.push(KeyValue::new(
                        gen_ai::EMBEDDINGS_DIMENSION_COUNT,
                        dimensions as i64,
                    ));
                }
            }
            ObservationPayload::Agent(details) => {
                attrs.push(KeyValue::new(gen_ai::OPERATION_NAME, gen_ai::operation::INVOKE_AGENT));
                attrs.push(KeyValue::new(gen_ai::AGENT_ID, details.agent_id.clone()));
            }
        }

        if let Some(usage) = obs.payload.usage() {
            if let Some(input) = usage.input {
                attrs.push(KeyValue::new(gen_ai::USAGE_INPUT_TOKENS, input as i64));
            }
            if let Some(output) = usage.output {
                attrs.push(KeyValue::new(gen_ai::USAGE_OUTPUT_TOKENS, output as i64));
            }
            attrs.push(KeyValue::new(
                attr::USAGE_DETAILS,
                serde_json::json!(usage).to_string(),
            ));
        }

        attrs
    }
}

fn remote_parent(trace_id: TraceId, span_id: SpanId) -> Context {
    Context::new().with_remote_span_context(SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    ))
}

/// Closest ancestor that is emitted, or the trace itself
fn emitted_ancestor<'a>(
    mut parent: &'a str,
    parents: &HashMap<&'a str, &'a str>,
    emitted: &HashSet<&str>,
) -> &'a str {
    while !emitted.contains(parent) {
        match parents.get(parent) {
            Some(grandparent) => parent = *grandparent,
            None => break,
        }
    }
    parent
}

impl<T> ObservationSink for SpanExportAdapter<T>
where
    T: Tracer + Send + Sync,
{
    fn name(&self) -> &'static str {
        "span-export"
    }

    fn export(&self, finished: &FinishedTrace) -> Result<(), ExportError> {
        let trace = &finished.trace;
        let trace_id = trace_id_for(&trace.id);
        let trace_end = trace.end_time.unwrap_or(trace.start_time);

        let mut root = self
            .tracer
            .span_builder(trace.name.clone())
            .with_trace_id(trace_id)
            .with_span_id(span_id_for(&trace.id))
            .with_kind(SpanKind::Internal)
            .with_start_time(SystemTime::from(trace.start_time))
            .with_attributes(self.trace_attributes(trace))
            .start_with_context(&self.tracer, &Context::new());
        if trace.level == Level::Error {
            root.set_status(Status::error("trace marked as error"));
        }
        root.end_with_timestamp(SystemTime::from(trace_end));

        let selected: Vec<(&Observation, Vec<KeyValue>)> = finished
            .observations
            .iter()
            .map(|obs| (obs, self.observation_attributes(obs)))
            .filter(|(obs, attrs)| self.should_emit(obs, attrs))
            .collect();

        let parents: HashMap<&str, &str> = finished
            .observations
            .iter()
            .map(|obs| (obs.id.as_str(), obs.parent_id.as_str()))
            .collect();
        let emitted: HashSet<&str> = selected.iter().map(|(obs, _)| obs.id.as_str()).collect();

        for (obs, attrs) in &selected {
            let parent = emitted_ancestor(&obs.parent_id, &parents, &emitted);
            let parent_cx = remote_parent(trace_id, span_id_for(parent));
            let mut span = self
                .tracer
                .span_builder(obs.name.clone())
                .with_span_id(span_id_for(&obs.id))
                .with_kind(SpanKind::Internal)
                .with_start_time(SystemTime::from(obs.start_time))
                .with_attributes(attrs.clone())
                .start_with_context(&self.tracer, &parent_cx);

            if obs.level == Level::Error {
                let message = obs
                    .status_message
                    .clone()
                    .unwrap_or_else(|| "observation marked as error".to_string());
                span.set_status(Status::error(message));
            }

            let end = obs.end_time.unwrap_or(trace_end);
            span.end_with_timestamp(SystemTime::from(end));
        }

        debug!(
            trace_id = %trace.id,
            spans = selected.len() + 1,
            filtered = finished.observations.len() - selected.len(),
            "Trace emitted as spans"
        );
        Ok(())
    }
}
