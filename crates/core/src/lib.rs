// Observation Hierarchy Context Manager
//
// This crate records a tree of nested observations (spans, generations,
// events, tool calls, embeddings, agent steps) for one logical execution
// without callers passing parent ids around by hand.
//
// Key design decisions:
// - One explicit TraceContext per flow of control; no thread-local or global state
// - Parent of a new observation = explicit parent, else the top of the flow's stack
// - Scoped creation returns a ScopeGuard that pops the stack on every exit path (Drop)
// - Out-of-order release is reported as StackDisciplineViolation and repaired
// - First input wins and last output wins at the trace root; outputs also reach every ancestor
// - Skipped observations and skipped traces are filtered before any sink sees them
// - Export happens once per trace at end; sinks (ObservationSink) are the only backend seam
// - Clock and IdGenerator are injected so tests are deterministic

pub mod builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod handle;
pub mod observation;
pub mod sink;
pub mod stack;
pub mod trace;
pub mod tracer;

// Re-exports for convenience
pub use builder::ObservationBuilder;
pub use clock::{Clock, IdGenerator, ManualClock, SequentialIdGenerator, SystemClock, UuidIdGenerator};
pub use config::{SkipPropagation, TracerConfig};
pub use error::{ExportError, Result, TraceError};
pub use guard::ScopeGuard;
pub use handle::{ObservationHandle, ObservationState};
pub use observation::{
    AgentDetails, EmbeddingDetails, GenerationDetails, Level, Observation, ObservationKind,
    ObservationPayload, SpanDetails, ToolCallDetails, Usage,
};
pub use sink::{FinishedTrace, InMemorySink, NoopSink, ObservationSink};
pub use stack::{ParentContextStack, PopOutcome};
pub use trace::{TraceContext, TraceOptions, TraceRecord};
pub use tracer::{Tracer, TracerBuilder};
