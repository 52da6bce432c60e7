//! # steer-agent
//!
//! Agent half of the steer service: the streaming LLM client, the tool
//! registry that exposes browser verbs to the model, per-conversation
//! sessions and the orchestrator that drives the chat → tool → chat loop.

pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod tools;

pub use llm::registry::{LlmConfigStore, MemoryConfigStore, ModelRegistry};
pub use llm::{ChatMessage, ChatModel, FinishReason, LlmConfig, ModelTurn, ToolCall, ToolDef};
pub use orchestrator::{FinalReason, Orchestrator, StreamChunk, STREAM_CAPACITY};
pub use session::{Session, SessionManager};
pub use tools::ToolRegistry;

/// Result type for steer-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the agent side. Input and not-found errors map to 4xx
/// at the HTTP boundary; upstream model errors terminate a stream with a
/// `final` chunk; cancellation is silent on the wire.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("message must not be empty")]
    MessageEmpty,

    #[error("config_id must not be empty")]
    ConfigIdEmpty,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("llm config not found: {0}")]
    ConfigNotFound(String),

    #[error("session {0} already has an active stream")]
    SessionBusy(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("malformed tool arguments: {0}")]
    MalformedArguments(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model rate limited")]
    ModelRateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}
