//! Error types for the Toolweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what escapes
//! a conversation. Tool-level failures never reach it: they are folded into
//! a failed `ToolExecutionResult` and fed back to the model.

use thiserror::Error;

use crate::message::Message;

/// The top-level error type for all Toolweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Loop termination ---
    #[error("Conversation loop exhausted after {max_iterations} iterations without a final answer")]
    LoopExhausted {
        max_iterations: u32,
        /// Every message accumulated before the loop gave up.
        transcript: Vec<Message>,
    },

    #[error("Tool-call adapter failed: {reason}")]
    Adapter {
        reason: String,
        transcript: Vec<Message>,
    },

    #[error("{scope} timed out after {limit_ms}ms")]
    Timeout {
        scope: TimeoutScope,
        limit_ms: u64,
        transcript: Vec<Message>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The partial transcript attached to a fatal loop error, if any.
    pub fn transcript(&self) -> Option<&[Message]> {
        match self {
            Self::LoopExhausted { transcript, .. }
            | Self::Adapter { transcript, .. }
            | Self::Timeout { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Which limit a [`Error::Timeout`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// One model call plus its tool round.
    Iteration,
    /// The whole conversation.
    Conversation,
}

impl std::fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iteration => write!(f, "Iteration"),
            Self::Conversation => write!(f, "Conversation"),
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("malformed arguments for {tool_name}: {reason}")]
    MalformedArguments { tool_name: String, reason: String },

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("{tool_name} panicked: {reason}")]
    Panicked { tool_name: String, reason: String },
}

impl ToolError {
    /// Shorthand for a failure raised by a tool body.
    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

/// Argument binding failures, produced by the parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: &'static str,
    },

    #[error("unknown field '{0}'")]
    UnknownField(String),
}
