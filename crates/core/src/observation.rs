// Observation Records
//
// Observation data model:
// - Span: generic unit of work
// - Generation: model call with model name, parameters and token usage
// - Event: point-in-time record
// - ToolCall: tool invocation
// - Embedding: embedding model call
// - Agent: agent step
//
// Kind-specific data lives in ObservationPayload and is opaque to the
// hierarchy logic; only the backend adapters look inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Span,
    Generation,
    Event,
    ToolCall,
    Embedding,
    Agent,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Span => "span",
            Self::Generation => "generation",
            Self::Event => "event",
            Self::ToolCall => "tool",
            Self::Embedding => "embedding",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an observation, used for filtering and highlighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Default => "DEFAULT",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Token usage of a model call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub total: Option<u64>,
}

impl Usage {
    pub fn tokens(input: u64, output: u64) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            total: Some(input.saturating_add(output)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanDetails {
    pub span_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationDetails {
    pub model: String,
    pub provider: Option<String>,
    pub model_parameters: BTreeMap<String, serde_json::Value>,
    pub usage: Option<Usage>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub prompt_name: Option<String>,
    pub prompt_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDetails {
    pub tool_name: String,
    pub tool_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDetails {
    pub model: String,
    pub provider: Option<String>,
    pub dimensions: Option<u32>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDetails {
    pub agent_id: String,
    pub description: Option<String>,
}

/// Kind-specific payload of an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationPayload {
    Span(SpanDetails),
    Generation(GenerationDetails),
    Event,
    ToolCall(ToolCallDetails),
    Embedding(EmbeddingDetails),
    Agent(AgentDetails),
}

impl ObservationPayload {
    pub fn span() -> Self {
        Self::Span(SpanDetails::default())
    }

    pub fn generation(model: impl Into<String>) -> Self {
        Self::Generation(GenerationDetails {
            model: model.into(),
            ..Default::default()
        })
    }

    pub fn tool_call(tool_name: impl Into<String>) -> Self {
        Self::ToolCall(ToolCallDetails {
            tool_name: tool_name.into(),
            tool_type: "function".to_string(),
            description: None,
        })
    }

    pub fn embedding(model: impl Into<String>) -> Self {
        Self::Embedding(EmbeddingDetails {
            model: model.into(),
            ..Default::default()
        })
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::Agent(AgentDetails {
            agent_id: agent_id.into(),
            description: None,
        })
    }

    pub fn kind(&self) -> ObservationKind {
        match self {
            Self::Span(_) => ObservationKind::Span,
            Self::Generation(_) => ObservationKind::Generation,
            Self::Event => ObservationKind::Event,
            Self::ToolCall(_) => ObservationKind::ToolCall,
            Self::Embedding(_) => ObservationKind::Embedding,
            Self::Agent(_) => ObservationKind::Agent,
        }
    }

    /// Model name for generation and embedding payloads
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Generation(g) => Some(&g.model),
            Self::Embedding(e) => Some(&e.model),
            _ => None,
        }
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            Self::Generation(g) => g.usage.as_ref(),
            Self::Embedding(e) => e.usage.as_ref(),
            _ => None,
        }
    }
}

/// One recorded unit within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub trace_id: String,
    /// Parent observation id, or the trace id for top-level observations
    pub parent_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    /// None while the observation is open
    pub end_time: Option<DateTime<Utc>>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub level: Level,
    pub status_message: Option<String>,
    pub version: Option<String>,
    pub excluded: bool,
    pub payload: ObservationPayload,
}

impl Observation {
    pub fn kind(&self) -> ObservationKind {
        self.payload.kind()
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// True when the parent is the trace root rather than another observation
    pub fn is_top_level(&self) -> bool {
        self.parent_id == self.trace_id
    }

    /// Set end time unless already ended; returns whether it changed
    pub(crate) fn finalize(&mut self, at: DateTime<Utc>) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(at);
        true
    }
}
