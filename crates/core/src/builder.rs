// Observation Builder
//
// Fluent factory for one observation. Collects the options, then either
// starts a scoped observation (pushes onto the parent stack, returns a
// ScopeGuard) or a plain one (returns a handle, stack untouched).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::guard::ScopeGuard;
use crate::handle::ObservationHandle;
use crate::observation::{Level, ObservationPayload};
use crate::trace::TraceContext;

/// Everything needed to create an observation
#[derive(Debug, Clone)]
pub(crate) struct ObservationSpec {
    pub name: String,
    pub payload: ObservationPayload,
    pub parent: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub level: Level,
    pub status_message: Option<String>,
    pub version: Option<String>,
}

#[must_use = "an observation is only created by start() or start_scoped()"]
pub struct ObservationBuilder<'a> {
    context: &'a TraceContext,
    spec: ObservationSpec,
}

impl<'a> ObservationBuilder<'a> {
    pub(crate) fn new(context: &'a TraceContext, name: String, payload: ObservationPayload) -> Self {
        Self {
            context,
            spec: ObservationSpec {
                name,
                payload,
                parent: None,
                start_time: None,
                input: None,
                output: None,
                metadata: BTreeMap::new(),
                level: Level::Default,
                status_message: None,
                version: None,
            },
        }
    }

    /// Explicit parent id, used verbatim instead of the stack top
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.spec.parent = Some(parent_id.into());
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.spec.start_time = Some(start_time);
        self
    }

    pub fn input(mut self, input: impl Into<serde_json::Value>) -> Self {
        self.spec.input = Some(input.into());
        self
    }

    pub fn output(mut self, output: impl Into<serde_json::Value>) -> Self {
        self.spec.output = Some(output.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.spec.metadata.insert(key.into(), value.into());
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.spec.level = level;
        self
    }

    pub fn status_message(mut self, message: impl Into<String>) -> Self {
        self.spec.status_message = Some(message.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.spec.version = Some(version.into());
        self
    }

    /// Free-form description (span, tool call, agent)
    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = Some(description.into());
        match &mut self.spec.payload {
            ObservationPayload::Span(d) => d.description = description,
            ObservationPayload::ToolCall(d) => d.description = description,
            ObservationPayload::Agent(d) => d.description = description,
            _ => {}
        }
        self
    }

    /// Model provider (generation, embedding)
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        let provider = Some(provider.into());
        match &mut self.spec.payload {
            ObservationPayload::Generation(d) => d.provider = provider,
            ObservationPayload::Embedding(d) => d.provider = provider,
            _ => {}
        }
        self
    }

    pub fn model_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let ObservationPayload::Generation(d) = &mut self.spec.payload {
            d.model_parameters.insert(key.into(), value.into());
        }
        self
    }

    pub fn span_type(mut self, span_type: impl Into<String>) -> Self {
        if let ObservationPayload::Span(d) = &mut self.spec.payload {
            d.span_type = Some(span_type.into());
        }
        self
    }

    pub fn tool_type(mut self, tool_type: impl Into<String>) -> Self {
        if let ObservationPayload::ToolCall(d) = &mut self.spec.payload {
            d.tool_type = tool_type.into();
        }
        self
    }

    /// Create the observation without touching the parent stack
    pub fn start(self) -> Result<ObservationHandle> {
        self.context.create_handle(self.spec)
    }

    /// Create the observation and make it the parent of subsequent ones
    /// until the returned guard is released or dropped
    pub fn start_scoped(self) -> Result<ScopeGuard> {
        self.context.create_scoped(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::ObservationKind;
    use crate::trace::TraceOptions;
    use crate::tracer::Tracer;

    #[test]
    fn test_kind_options_apply_to_matching_payload() {
        let tracer = Tracer::new();
        let ctx = tracer.start_trace(TraceOptions::new("builder"));

        let generation = ctx
            .generation("chat", "gpt-4o")
            .provider("openai")
            .model_parameter("temperature", 0.2)
            .start()
            .unwrap();

        match generation.snapshot().unwrap().payload {
            ObservationPayload::Generation(d) => {
                assert_eq!(d.provider.as_deref(), Some("openai"));
                assert_eq!(d.model_parameters["temperature"], serde_json::json!(0.2));
            }
            other => panic!("Expected generation payload, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_kind_options_are_ignored() {
        let tracer = Tracer::new();
        let ctx = tracer.start_trace(TraceOptions::new("builder"));

        let event = ctx
            .event("marker")
            .provider("openai")
            .tool_type("retrieval")
            .start()
            .unwrap();

        let snapshot = event.snapshot().unwrap();
        assert_eq!(snapshot.kind(), ObservationKind::Event);
        assert_eq!(snapshot.payload, ObservationPayload::Event);
    }

    #[test]
    fn test_metadata_level_and_version() {
        let tracer = Tracer::new();
        let ctx = tracer.start_trace(TraceOptions::new("builder"));

        let span = ctx
            .span("step")
            .metadata("attempt", 2)
            .level(Level::Warning)
            .version("v2")
            .status_message("retrying")
            .start()
            .unwrap();

        let snapshot = span.snapshot().unwrap();
        assert_eq!(snapshot.metadata["attempt"], serde_json::json!(2));
        assert_eq!(snapshot.level, Level::Warning);
        assert_eq!(snapshot.version.as_deref(), Some("v2"));
        assert_eq!(snapshot.status_message.as_deref(), Some("retrying"));
    }
}
