//! Agent Core error types.

use thiserror::Error;

use crate::inference::errors::InferenceError;

/// Errors that end a turn without a model answer.
///
/// Provider failures never show up here: the retry controller turns them
/// into graceful responses carrying error metadata.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The session's cancellation token fired.
    #[error("turn cancelled")]
    Cancelled,

    /// Configuration or client setup failed.
    #[error("inference setup failed: {0}")]
    Inference(#[from] InferenceError),

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

/// Errors from the tool execution collaborator. The orchestrator turns each
/// into a `ToolResult` with `is_error` set.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No route or handler for the requested tool.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// The tool did not answer within the per-call limit.
    #[error("tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    /// Transport failure reaching the tool endpoint.
    #[error("tool '{name}' unreachable: {reason}")]
    Transport { name: String, reason: String },

    /// Non-2xx response from the tool endpoint.
    #[error("tool '{name}' returned HTTP {status}: {body}")]
    Http {
        name: String,
        status: u16,
        body: String,
    },

    /// The tool ran and reported a failure.
    #[error("tool '{name}' failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

impl ToolError {
    /// JSON payload fed back to the model in place of a result.
    pub fn to_payload(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}
