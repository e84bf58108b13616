// Error types for the conversation engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur while driving a conversation turn
#[derive(Debug, Error)]
pub enum ChatError {
    /// Provider transport error - terminal for the turn, the conversation
    /// is left at the last persisted point
    #[error("Transport error: {0}")]
    Transport(String),

    /// Tool execution error - non-fatal, normally encoded into a
    /// tool_result segment instead of surfacing here
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// A provider frame that could not be decoded
    #[error("Malformed provider frame: {0}")]
    MalformedFrame(String),

    /// Persistence collaborator failure
    #[error("Event store error: {0}")]
    Store(String),

    /// Branch materialization failed and was rolled back
    #[error("Branch failed: {0}")]
    BranchFailed(String),

    /// Tool-call loop exceeded the configured round cap
    #[error("Tool round limit ({0}) reached")]
    ToolRoundLimit(usize),

    /// The caller-visible stream was closed mid-turn
    #[error("Turn cancelled")]
    Cancelled,

    /// No transport registered for the requested model's profile
    #[error("No transport registered for profile {0}")]
    NoTransport(String),

    /// Conversation not found in the store
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    /// Request carried neither history nor a message to act on
    #[error("Empty request: no events to process")]
    EmptyRequest,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        ChatError::ToolExecution(msg.into())
    }

    /// Create a malformed frame error
    pub fn frame(msg: impl Into<String>) -> Self {
        ChatError::MalformedFrame(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        ChatError::Store(msg.into())
    }

    /// Create a branch failure error
    pub fn branch(msg: impl Into<String>) -> Self {
        ChatError::BranchFailed(msg.into())
    }
}
