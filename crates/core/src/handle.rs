// Observation Handle
//
// Cheap, cloneable reference to one observation of a trace. All mutations go
// through the shared trace state; input and output are relayed toward the
// trace root. Mutations after the trace has been exported are ignored.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::observation::{Level, Observation, ObservationKind, ObservationPayload, Usage};
use crate::trace::TraceShared;

/// Lifecycle position of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationState {
    Created,
    Updated,
    Ended,
    /// Terminal: handed to the sinks
    Exported,
    /// Terminal: withheld from the sinks
    Excluded,
}

#[derive(Clone)]
pub struct ObservationHandle {
    trace: Arc<TraceShared>,
    id: String,
    trace_id: String,
    kind: ObservationKind,
}

impl fmt::Debug for ObservationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationHandle")
            .field("id", &self.id)
            .field("trace_id", &self.trace_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ObservationHandle {
    pub(crate) fn new(
        trace: Arc<TraceShared>,
        id: String,
        trace_id: String,
        kind: ObservationKind,
    ) -> Self {
        Self {
            trace,
            id,
            trace_id,
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn kind(&self) -> ObservationKind {
        self.kind
    }

    /// Current copy of the observation record
    pub fn snapshot(&self) -> Option<Observation> {
        let state = self.trace.lock();
        let index = *state.index.get(&self.id)?;
        Some(state.entries[index].observation.clone())
    }

    pub fn state(&self) -> ObservationState {
        let state = self.trace.lock();
        let Some(&index) = state.index.get(&self.id) else {
            return ObservationState::Excluded;
        };
        let entry = &state.entries[index];
        match entry.exported {
            Some(true) => ObservationState::Exported,
            Some(false) => ObservationState::Excluded,
            None if entry.observation.is_ended() => ObservationState::Ended,
            None if entry.updated => ObservationState::Updated,
            None => ObservationState::Created,
        }
    }

    fn update(&self, f: impl FnOnce(&mut Observation)) {
        self.trace
            .update(&self.id, |state, index| f(&mut state.entries[index].observation));
    }

    /// Set the input; the first input of the trace also becomes the trace input
    pub fn set_input(&self, input: impl Into<serde_json::Value>) {
        let input = input.into();
        self.trace
            .update(&self.id, |state, index| state.propagate_input(index, input));
    }

    /// Set the output on this observation, every ancestor and the trace
    pub fn set_output(&self, output: impl Into<serde_json::Value>) {
        let output = output.into();
        self.trace
            .update(&self.id, |state, index| state.propagate_output(index, output));
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let (key, value) = (key.into(), value.into());
        self.update(|obs| {
            obs.metadata.insert(key, value);
        });
    }

    pub fn set_level(&self, level: Level) {
        self.update(|obs| obs.level = level);
    }

    pub fn set_status_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|obs| obs.status_message = Some(message));
    }

    pub fn set_version(&self, version: impl Into<String>) {
        let version = version.into();
        self.update(|obs| obs.version = Some(version));
    }

    /// Mark as errored: level Error plus a status message
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|obs| {
            obs.level = Level::Error;
            obs.status_message = Some(message);
        });
    }

    /// End now; later calls keep the first end time
    pub fn end(&self) {
        let now = self.trace.runtime.clock.now();
        self.end_at(now);
    }

    pub fn end_at(&self, at: DateTime<Utc>) {
        self.update(|obs| {
            obs.finalize(at);
        });
    }

    pub fn is_ended(&self) -> bool {
        self.snapshot().map(|o| o.is_ended()).unwrap_or(true)
    }

    /// Exclude this observation from export
    pub fn skip(&self) {
        self.update(|obs| obs.excluded = true);
    }

    /// True when this observation itself is marked excluded
    pub fn is_skipped(&self) -> bool {
        self.snapshot().map(|o| o.excluded).unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Kind-specific
    // ------------------------------------------------------------------------

    fn update_payload(&self, field: &'static str, f: impl FnOnce(&mut ObservationPayload) -> bool) {
        let kind = self.kind;
        self.update(|obs| {
            if !f(&mut obs.payload) {
                debug!(observation_id = %obs.id, %kind, field, "Ignoring field not supported by kind");
            }
        });
    }

    pub fn set_model_parameter(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let (key, value) = (key.into(), value.into());
        self.update_payload("model_parameters", |payload| match payload {
            ObservationPayload::Generation(d) => {
                d.model_parameters.insert(key, value);
                true
            }
            _ => false,
        });
    }

    pub fn set_usage(&self, usage: Usage) {
        self.update_payload("usage", |payload| match payload {
            ObservationPayload::Generation(d) => {
                d.usage = Some(usage);
                true
            }
            ObservationPayload::Embedding(d) => {
                d.usage = Some(usage);
                true
            }
            _ => false,
        });
    }

    /// Record when the first completion token arrived
    pub fn set_completion_start_time(&self, at: DateTime<Utc>) {
        self.update_payload("completion_start_time", |payload| match payload {
            ObservationPayload::Generation(d) => {
                d.completion_start_time = Some(at);
                true
            }
            _ => false,
        });
    }

    /// Set completion start time to now
    pub fn mark_completion_start(&self) {
        let now = self.trace.runtime.clock.now();
        self.set_completion_start_time(now);
    }

    pub fn set_prompt(&self, name: impl Into<String>, version: u32) {
        let name = name.into();
        self.update_payload("prompt", |payload| match payload {
            ObservationPayload::Generation(d) => {
                d.prompt_name = Some(name);
                d.prompt_version = Some(version);
                true
            }
            _ => false,
        });
    }

    pub fn set_dimensions(&self, dimensions: u32) {
        self.update_payload("dimensions", |payload| match payload {
            ObservationPayload::Embedding(d) => {
                d.dimensions = Some(dimensions);
                true
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::trace::TraceOptions;
    use crate::tracer::Tracer;
    use chrono::TimeZone;
    use serde_json::json;

    fn tracer() -> Tracer {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Tracer::builder().clock(ManualClock::new(start)).build()
    }

    #[test]
    fn test_state_transitions() {
        let tracer = tracer();
        let mut ctx = tracer.start_trace(TraceOptions::new("states"));

        let span = ctx.span("work").start().unwrap();
        assert_eq!(span.state(), ObservationState::Created);

        span.set_metadata("k", "v");
        assert_eq!(span.state(), ObservationState::Updated);

        span.end();
        assert_eq!(span.state(), ObservationState::Ended);

        ctx.end();
        assert_eq!(span.state(), ObservationState::Exported);
    }

    #[test]
    fn test_skipped_observation_ends_excluded() {
        let tracer = tracer();
        let mut ctx = tracer.start_trace(TraceOptions::new("states"));

        let span = ctx.span("work").start().unwrap();
        span.skip();
        assert!(span.is_skipped());

        ctx.end();
        assert_eq!(span.state(), ObservationState::Excluded);
    }

    #[test]
    fn test_first_end_wins() {
        let tracer = tracer();
        let ctx = tracer.start_trace(TraceOptions::new("end"));

        let span = ctx.span("work").start().unwrap();
        span.end();
        let first = span.snapshot().unwrap().end_time;
        span.end();

        assert!(first.is_some());
        assert_eq!(span.snapshot().unwrap().end_time, first);
    }

    #[test]
    fn test_kind_specific_setters() {
        let tracer = tracer();
        let ctx = tracer.start_trace(TraceOptions::new("kinds"));

        let generation = ctx.generation("chat", "gpt-4o").start().unwrap();
        generation.set_usage(Usage::tokens(10, 5));
        generation.set_prompt("support-prompt", 3);
        generation.mark_completion_start();

        let embedding = ctx.embedding("embed", "text-embedding-3-small").start().unwrap();
        embedding.set_dimensions(1536);
        // Not a generation: ignored
        embedding.set_prompt("ignored", 1);

        match generation.snapshot().unwrap().payload {
            ObservationPayload::Generation(d) => {
                assert_eq!(d.usage.unwrap().total, Some(15));
                assert_eq!(d.prompt_name.as_deref(), Some("support-prompt"));
                assert_eq!(d.prompt_version, Some(3));
                assert!(d.completion_start_time.is_some());
            }
            other => panic!("Expected generation payload, got {:?}", other),
        }

        match embedding.snapshot().unwrap().payload {
            ObservationPayload::Embedding(d) => assert_eq!(d.dimensions, Some(1536)),
            other => panic!("Expected embedding payload, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_sets_error_level() {
        let tracer = tracer();
        let ctx = tracer.start_trace(TraceOptions::new("fail"));

        let tool = ctx.tool_call("lookup", "search").start().unwrap();
        tool.fail("timeout");

        let snapshot = tool.snapshot().unwrap();
        assert_eq!(snapshot.level, Level::Error);
        assert_eq!(snapshot.status_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_mutations_after_export_are_ignored() {
        let tracer = tracer();
        let mut ctx = tracer.start_trace(TraceOptions::new("late"));

        let span = ctx.span("work").start().unwrap();
        ctx.end();

        span.set_output(json!("late"));
        assert!(span.snapshot().unwrap().output.is_none());
        assert!(ctx.record().unwrap().output.is_none());
    }
}
