// Span Attribute Names
//
// Attribute keys written by the span-export adapter: Langfuse's OTLP
// attribute names for trace and observation fields, plus the Gen-AI
// semantic conventions for model calls.
// See: https://opentelemetry.io/docs/specs/semconv/gen-ai/

/// Langfuse trace-level attributes (set on the root span)
pub mod trace {
    pub const NAME: &str = "langfuse.trace.name";
    pub const ID: &str = "langfuse.trace.id";
    pub const TAGS: &str = "langfuse.trace.tags";
    pub const INPUT: &str = "langfuse.trace.input";
    pub const OUTPUT: &str = "langfuse.trace.output";
    pub const PUBLIC: &str = "langfuse.trace.public";
    /// Prefix; the metadata key is appended
    pub const METADATA_PREFIX: &str = "langfuse.trace.metadata";
    pub const USER_ID: &str = "langfuse.user.id";
    pub const SESSION_ID: &str = "langfuse.session.id";
    pub const RELEASE: &str = "langfuse.release";
    pub const VERSION: &str = "langfuse.version";
    pub const ENVIRONMENT: &str = "langfuse.environment";
}

/// Langfuse observation-level attributes
pub mod observation {
    pub const ID: &str = "langfuse.observation.id";
    pub const TYPE: &str = "langfuse.observation.type";
    pub const LEVEL: &str = "langfuse.observation.level";
    pub const STATUS_MESSAGE: &str = "langfuse.observation.status_message";
    pub const INPUT: &str = "langfuse.observation.input";
    pub const OUTPUT: &str = "langfuse.observation.output";
    /// Prefix; the metadata key is appended
    pub const METADATA_PREFIX: &str = "langfuse.observation.metadata";
    pub const VERSION: &str = "langfuse.observation.version";
    pub const MODEL_NAME: &str = "langfuse.observation.model.name";
    pub const MODEL_PARAMETERS: &str = "langfuse.observation.model.parameters";
    pub const USAGE_DETAILS: &str = "langfuse.observation.usage_details";
    pub const PROMPT_NAME: &str = "langfuse.observation.prompt.name";
    pub const PROMPT_VERSION: &str = "langfuse.observation.prompt.version";
    pub const COMPLETION_START_TIME: &str = "langfuse.observation.completion_start_time";

    /// Values of `langfuse.observation.type`
    pub mod kind {
        pub const SPAN: &str = "span";
        pub const GENERATION: &str = "generation";
        pub const EVENT: &str = "event";
        pub const TOOL: &str = "tool";
        pub const EMBEDDING: &str = "embedding";
        pub const AGENT: &str = "agent";
    }
}

/// Gen-AI semantic convention attribute names
pub mod gen_ai {
    /// Common prefix of every gen-ai attribute
    pub const PREFIX: &str = "gen_ai.";
    /// The name of the operation being performed (e.g., "chat", "embeddings")
    pub const OPERATION_NAME: &str = "gen_ai.operation.name";
    /// The name of the GenAI provider (e.g., "openai", "anthropic")
    pub const PROVIDER_NAME: &str = "gen_ai.provider.name";
    /// The name of the model requested
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    /// Number of tokens in the input/prompt
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    /// Number of tokens in the output/completion
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    /// Name of the tool being executed
    pub const TOOL_NAME: &str = "gen_ai.tool.name";
    /// Type of tool (function, extension, datastore)
    pub const TOOL_TYPE: &str = "gen_ai.tool.type";
    /// Conversation or session identifier
    pub const CONVERSATION_ID: &str = "gen_ai.conversation.id";
    /// Number of dimensions in output embeddings
    pub const EMBEDDINGS_DIMENSION_COUNT: &str = "gen_ai.embeddings.dimension.count";
    pub const AGENT_ID: &str = "gen_ai.agent.id";

    /// Operation names as per semantic conventions
    pub mod operation {
        pub const CHAT: &str = "chat";
        pub const EMBEDDINGS: &str = "embeddings";
        pub const EXECUTE_TOOL: &str = "execute_tool";
        pub const INVOKE_AGENT: &str = "invoke_agent";
    }
}

/// Attribute key for one metadata entry under `prefix`
pub fn metadata_key(prefix: &str, key: &str) -> String {
    format!("{}.{}", prefix, key)
}
