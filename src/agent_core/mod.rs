//! Agent Core: context management and the tool-call loop.
//!
//! Submodules:
//! - `conversation`: message-count trimming, orphan repair, aggressive fallback
//! - `chunker`: splits oversized dialogue messages
//! - `truncator`: tiered truncation of tool-result payloads
//! - `tokens`: character-based size measurement
//! - `retry`: retry, backoff, and context-overflow recovery
//! - `tool_router`: runs tool calls through a `ToolExecutor`
//! - `orchestrator`: `Session` and the bounded tool-call loop
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod chunker;
pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod retry;
pub mod tokens;
pub mod tool_router;
pub mod truncator;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use errors::{AgentError, ToolError};
pub use orchestrator::{Sampling, Session};
pub use retry::{RetryController, RetryPolicy};
pub use tool_router::{HttpToolExecutor, ToolExecutor, ToolRouter};
pub use types::{
    Budget, ChunkingStrategy, ConversationStrategy, TruncationBudgets, TurnOutcome,
};
