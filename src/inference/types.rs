//! Shared types for the inference boundary.
//!
//! `Message` is the canonical conversation unit. Tool linkage can appear in
//! three wire shapes and every shape is representable here:
//!
//! - **embedded**: `content` is a block array carrying `tool_use` and
//!   `tool_result` blocks alongside text.
//! - **separate**: assistant messages carry `tool_calls`, and each result is a
//!   `tool`-role message with a single `tool_results` entry.
//! - **marked**: a user-role message whose text is [`TOOL_RESULTS_MARKER`] and
//!   whose `tool_results` carry the payloads (text-marker model families).
//!
//! Algorithms never look at the shape directly; they go through
//! [`extract_tool_invocations`] and [`extract_tool_results`] and the
//! `Message` mutators below.

use serde::{Deserialize, Serialize};

use super::errors::ErrorClass;

/// Text used as the visible content of a marked tool-results message.
pub const TOOL_RESULTS_MARKER: &str = "[Tool results]";

// ─── Roles & Families ────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// How a model family expresses tool calls on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Content-block arrays with `tool_use` / `tool_result` blocks.
    Embedded,
    /// OpenAI-style `tool_calls` plus `role: "tool"` result messages.
    Separate,
    /// Plain-text markers parsed out of the model's free text.
    InlineMarker,
}

impl ModelFamily {
    /// Short name used in logs and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Embedded => "embedded",
            ModelFamily::Separate => "separate",
            ModelFamily::InlineMarker => "inline_marker",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Tool Linkage ────────────────────────────────────────────────────────────

/// A request, emitted by the model, to run a named external function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique ID for this call (generated if the model doesn't provide one).
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The value or error returned after running a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the invocation this result answers.
    pub tool_call_id: String,
    /// Serialized result payload (or error description when `is_error`).
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Borrowed view of a tool result, independent of wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolResultRef<'a> {
    pub tool_call_id: &'a str,
    pub content: &'a str,
    pub is_error: bool,
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// One typed block of an embedded-shape message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Message body: plain text or an array of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// A single message in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Separate-shape tool invocations (assistant messages).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// Separate-shape and marked-shape tool results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// Build the assistant message that issues `calls`, in `family`'s shape.
    pub fn assistant_tool_calls(
        family: ModelFamily,
        text: Option<&str>,
        calls: &[ToolInvocation],
    ) -> Self {
        let text = text.unwrap_or_default();
        match family {
            ModelFamily::Embedded => {
                let mut blocks = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
                blocks.extend(calls.iter().map(|c| ContentBlock::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.arguments.clone(),
                }));
                Self {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(blocks),
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                }
            }
            ModelFamily::Separate | ModelFamily::InlineMarker => Self {
                role: Role::Assistant,
                content: MessageContent::Text(text.to_string()),
                tool_calls: calls.to_vec(),
                tool_results: Vec::new(),
            },
        }
    }

    /// Build the message(s) that carry `results` back to the model.
    ///
    /// The separate shape needs one `tool` message per result; the other
    /// shapes bundle all results into a single user message.
    pub fn tool_results(family: ModelFamily, results: Vec<ToolResult>) -> Vec<Self> {
        match family {
            ModelFamily::Separate => results
                .into_iter()
                .map(|r| Self {
                    role: Role::Tool,
                    content: MessageContent::Text(String::new()),
                    tool_calls: Vec::new(),
                    tool_results: vec![r],
                })
                .collect(),
            ModelFamily::Embedded => vec![Self {
                role: Role::User,
                content: MessageContent::Blocks(
                    results
                        .into_iter()
                        .map(|r| ContentBlock::ToolResult {
                            tool_use_id: r.tool_call_id,
                            content: r.content,
                            is_error: r.is_error,
                        })
                        .collect(),
                ),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            }],
            ModelFamily::InlineMarker => vec![Self {
                role: Role::User,
                content: MessageContent::Text(TOOL_RESULTS_MARKER.to_string()),
                tool_calls: Vec::new(),
                tool_results: results,
            }],
        }
    }

    /// Visible text of the message (text blocks joined with newlines).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether the message has visible text other than the results marker.
    pub fn has_dialogue_text(&self) -> bool {
        let text = self.text();
        let trimmed = text.trim();
        !trimmed.is_empty() && trimmed != TOOL_RESULTS_MARKER
    }

    /// Whether any tool result (in any shape) is attached.
    pub fn carries_tool_results(&self) -> bool {
        !self.tool_results.is_empty()
            || matches!(&self.content, MessageContent::Blocks(blocks)
                if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })))
    }

    /// Whether any tool invocation (in any shape) is attached.
    pub fn carries_tool_invocations(&self) -> bool {
        !self.tool_calls.is_empty()
            || matches!(&self.content, MessageContent::Blocks(blocks)
                if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }

    /// A message that exists only to move tool traffic: it carries results,
    /// or carries invocations without any dialogue text.
    pub fn is_tool_message(&self) -> bool {
        self.role == Role::Tool
            || self.carries_tool_results()
            || (self.carries_tool_invocations() && !self.has_dialogue_text())
    }

    /// True when nothing meaningful is left (no text, no tool linkage).
    pub fn is_hollow(&self) -> bool {
        !self.carries_tool_results()
            && !self.carries_tool_invocations()
            && (self.role == Role::Tool || !self.has_dialogue_text())
    }

    /// Drop tool results for which `keep` returns false. Returns the number
    /// of entries removed.
    pub fn retain_tool_results<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.tool_results.len();
        self.tool_results.retain(|r| keep(&r.tool_call_id));
        let mut removed = before - self.tool_results.len();

        if let MessageContent::Blocks(blocks) = &mut self.content {
            let before = blocks.len();
            blocks.retain(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => keep(tool_use_id),
                _ => true,
            });
            removed += before - blocks.len();
        }
        removed
    }

    /// Drop tool invocations for which `keep` returns false. Returns the
    /// number of invocations removed.
    pub fn retain_tool_invocations<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.tool_calls.len();
        self.tool_calls.retain(|c| keep(&c.id));
        let mut removed = before - self.tool_calls.len();

        if let MessageContent::Blocks(blocks) = &mut self.content {
            let before = blocks.len();
            blocks.retain(|b| match b {
                ContentBlock::ToolUse { id, .. } => keep(id),
                _ => true,
            });
            removed += before - blocks.len();
        }
        removed
    }

    /// Visit every tool-result payload mutably, in order.
    pub fn for_each_tool_result_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&str, &mut String),
    {
        for r in &mut self.tool_results {
            visit(&r.tool_call_id, &mut r.content);
        }
        if let MessageContent::Blocks(blocks) = &mut self.content {
            for b in blocks {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = b
                {
                    visit(tool_use_id, content);
                }
            }
        }
    }

    /// Visit every visible text segment mutably.
    pub fn for_each_text_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut String),
    {
        match &mut self.content {
            MessageContent::Text(s) => visit(s),
            MessageContent::Blocks(blocks) => {
                for b in blocks {
                    if let ContentBlock::Text { text } = b {
                        visit(text);
                    }
                }
            }
        }
    }
}

// ─── Shape-independent accessors ────────────────────────────────────────────

/// All tool invocations carried by `msg`, in order, whatever the shape.
pub fn extract_tool_invocations(msg: &Message) -> Vec<ToolInvocation> {
    let mut out: Vec<ToolInvocation> = msg.tool_calls.clone();
    if let MessageContent::Blocks(blocks) = &msg.content {
        for b in blocks {
            if let ContentBlock::ToolUse { id, name, input } = b {
                out.push(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                });
            }
        }
    }
    out
}

/// IDs of all tool invocations carried by `msg`.
pub fn invocation_ids(msg: &Message) -> Vec<&str> {
    let mut out: Vec<&str> = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
    if let MessageContent::Blocks(blocks) = &msg.content {
        for b in blocks {
            if let ContentBlock::ToolUse { id, .. } = b {
                out.push(id);
            }
        }
    }
    out
}

/// All tool results carried by `msg`, in order, whatever the shape.
pub fn extract_tool_results(msg: &Message) -> Vec<ToolResultRef<'_>> {
    let mut out: Vec<ToolResultRef<'_>> = msg
        .tool_results
        .iter()
        .map(|r| ToolResultRef {
            tool_call_id: &r.tool_call_id,
            content: &r.content,
            is_error: r.is_error,
        })
        .collect();
    if let MessageContent::Blocks(blocks) = &msg.content {
        for b in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = b
            {
                out.push(ToolResultRef {
                    tool_call_id: tool_use_id,
                    content,
                    is_error: *is_error,
                });
            }
        }
    }
    out
}

// ─── Request / Response ──────────────────────────────────────────────────────

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// One request to a model endpoint, in canonical form.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Machine-readable description of a failure that was turned into a
/// user-facing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetadata {
    pub class: ErrorClass,
    /// Underlying error, as text.
    pub message: String,
    pub model_family: ModelFamily,
    /// Requests sent before giving up.
    pub attempts: u32,
    /// Message count of the first request.
    pub original_message_count: usize,
    /// Message count after the aggressive fallback, if it ran.
    pub fallback_message_count: Option<usize>,
    /// Multi-line diagnostic naming the family, counts, and remedies.
    pub diagnostic: String,
    pub hints: Vec<String>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// A model endpoint's answer, in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelResponse {
    /// Free text (None when the model only called tools).
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Option<Usage>,
    /// Why the model stopped: `"stop"`, `"tool_calls"`, `"error"`, ...
    pub finish_reason: Option<String>,
    /// Set when the response was synthesized from a failure.
    pub error: Option<ErrorMetadata>,
}

impl ModelResponse {
    /// Plain text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some("stop".to_string()),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
