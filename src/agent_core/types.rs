//! Shared types for the agent core.
//!
//! Strategy selectors, truncation budgets, and the per-turn outcome handed
//! back to callers of `Session::run_turn`.

use serde::{Deserialize, Serialize};

use crate::inference::types::{ErrorMetadata, ToolInvocation, Usage};

// ─── Strategies ─────────────────────────────────────────────────────────────

/// How the conversation trimmer chooses which messages to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStrategy {
    /// System message (if preserved) plus the most recent messages.
    #[default]
    SlidingWindow,
    /// Same selection as the sliding window, with no re-balancing.
    Truncate,
    /// Drops tool traffic before dialogue when tool messages dominate.
    SmartPrune,
}

impl ConversationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStrategy::SlidingWindow => "sliding_window",
            ConversationStrategy::Truncate => "truncate",
            ConversationStrategy::SmartPrune => "smart_prune",
        }
    }
}

/// How oversized messages are split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed-size windows with overlap.
    Simple,
    /// Cut at paragraph or sentence boundaries near the target size.
    #[default]
    PreserveContext,
}

// ─── Budgets ────────────────────────────────────────────────────────────────

/// A (threshold, target) pair of sizes in characters.
///
/// Truncation engages once a size exceeds `threshold` and cuts down to at
/// most `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub threshold: usize,
    pub target: usize,
}

impl Budget {
    pub const fn new(threshold: usize, target: usize) -> Self {
        Self { threshold, target }
    }
}

/// The two budget classes applied to tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationBudgets {
    /// Tool results that are no longer the newest in the conversation.
    pub history: Budget,
    /// The trailing group of tool results the model is reasoning about now.
    /// `threshold` applies to the group's combined size; each entry of an
    /// oversized group is cut to `threshold / entries`, capped at `target`.
    pub new_response: Budget,
}

impl Default for TruncationBudgets {
    fn default() -> Self {
        Self {
            history: Budget::new(50_000, 25_000),
            new_response: Budget::new(200_000, 150_000),
        }
    }
}

// ─── Turn Outcome ───────────────────────────────────────────────────────────

/// Result of one user turn through the tool-call loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Final visible answer (may be empty).
    pub content: String,
    /// Always empty once the loop has finished; kept for callers that
    /// inspect it after a round-limit stop.
    pub tool_calls: Vec<ToolInvocation>,
    /// Tool rounds executed during this turn.
    pub rounds: u32,
    pub finish_reason: Option<String>,
    /// Usage summed over every model call in the turn.
    pub usage: Usage,
    /// Set when the answer was synthesized from a failure.
    pub error: Option<ErrorMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_serde_names() {
        let s: ConversationStrategy = serde_yaml::from_str("smart_prune").unwrap();
        assert_eq!(s, ConversationStrategy::SmartPrune);
        let c: ChunkingStrategy = serde_yaml::from_str("preserve_context").unwrap();
        assert_eq!(c, ChunkingStrategy::PreserveContext);
    }

    #[test]
    fn test_default_budgets_target_below_threshold() {
        let b = TruncationBudgets::default();
        assert!(b.history.target < b.history.threshold);
        assert!(b.new_response.target < b.new_response.threshold);
    }
}
