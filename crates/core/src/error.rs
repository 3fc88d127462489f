//! Error types for the Atlas domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum. `Error` is what a
//! conversation turn returns to its caller.

use thiserror::Error;

/// The error returned by a failed conversation turn.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] AgentError),
}

// --- Bounded context errors ---

/// The single error surface of a model endpoint client.
///
/// Bad statuses, transport failures and error strings embedded in streamed
/// frames all land here. No variant is retried by the client itself.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model endpoint reported an error: {0}")]
    Remote(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response from model endpoint: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures that abort a whole conversation turn.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Maximum tool iterations exceeded ({max_rounds} rounds). Conversation aborted.")]
    TooManyToolRounds { max_rounds: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
