//! Session and the tool-call loop.
//!
//! A [`Session`] owns one conversation. [`Session::run_turn`] drives a single
//! user turn as a bounded state machine:
//!
//! ```text
//! AwaitingModel ──(no tool calls)──────────────▶ Done
//!       ▲                  │
//!       │            (tool calls, round < max)
//!       │                  ▼
//!       └──────────── ExecutingTools
//! ```
//!
//! Before every model request the history is trimmed to the message budget
//! and oversized tool results are truncated. If the round limit is reached
//! with tool calls still pending, the turn ends with a note appended to the
//! answer and no pending calls. Input that chunks into more messages than the
//! window holds is answered with a graceful error and never sent.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::inference::client::ModelEndpoint;
use crate::inference::config::{EndpointConfig, SessionSettings};
use crate::inference::types::{
    Message, ModelFamily, ModelRequest, ModelResponse, Role, ToolDefinition, Usage,
    TOOL_RESULTS_MARKER,
};

use super::chunker::{chunk_if_oversized, ChunkSettings};
use super::conversation::{trim, TrimSettings};
use super::errors::AgentError;
use super::retry::{oversized_input_response, RetryController, RetryPolicy};
use super::tokens::{history_chars, preview};
use super::tool_router::{ToolExecutor, ToolRouter};
use super::truncator::truncate_tool_messages;
use super::types::{TruncationBudgets, TurnOutcome};

// ─── Sampling ───────────────────────────────────────────────────────────────

/// Per-request generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }
}

impl From<&EndpointConfig> for Sampling {
    fn from(c: &EndpointConfig) -> Self {
        Self {
            temperature: c.temperature,
            max_output_tokens: c.max_output_tokens,
        }
    }
}

/// True when `text` is nothing but the internal tool-results marker.
fn is_placeholder(text: &str) -> bool {
    text.trim() == TOOL_RESULTS_MARKER
}

fn round_limit_note(max_rounds: u32, pending: usize) -> String {
    format!(
        "[Stopped after reaching the limit of {max_rounds} tool-call rounds; \
         {pending} pending tool call(s) were not executed.]"
    )
}

// ─── Session ────────────────────────────────────────────────────────────────

/// One conversation with one model endpoint.
///
/// All operations take `&mut self`, so a session never has two model calls
/// in flight. Sessions share nothing mutable with each other.
pub struct Session {
    id: String,
    family: ModelFamily,
    settings: SessionSettings,
    history: Vec<Message>,
    endpoint: Arc<dyn ModelEndpoint>,
    router: ToolRouter,
    tools: Vec<ToolDefinition>,
    retry: RetryController,
    trim: TrimSettings,
    chunking: ChunkSettings,
    budgets: TruncationBudgets,
    sampling: Sampling,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session. Fails when `settings` do not validate.
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        executor: Arc<dyn ToolExecutor>,
        settings: SessionSettings,
        sampling: Sampling,
    ) -> Result<Self, AgentError> {
        settings.validate()?;

        let history = settings
            .system_prompt
            .as_ref()
            .map(|p| vec![Message::system(p.clone())])
            .unwrap_or_default();
        let router = ToolRouter::new(executor, settings.tool_timeout());
        let tools = router.definitions();
        let id = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            session_id = %id,
            family = %endpoint.family(),
            tools = tools.len(),
            strategy = settings.conversation_strategy.as_str(),
            max_messages = settings.max_conversation_messages,
            "session started"
        );

        Ok(Self {
            id,
            family: endpoint.family(),
            retry: RetryController::new(RetryPolicy::from(&settings)),
            trim: TrimSettings::from(&settings),
            chunking: ChunkSettings {
                max_message_size: settings.max_message_size,
                chunk_size: settings.chunk_size,
                overlap: settings.chunk_overlap,
                strategy: settings.chunking_strategy,
            },
            budgets: settings.budgets(),
            settings,
            history,
            endpoint,
            router,
            tools,
            sampling,
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Snapshot of the conversation as it will next be sent.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Size of the history in characters.
    pub fn context_size(&self) -> usize {
        history_chars(&self.history)
    }

    /// History as pretty JSON, for diagnostics.
    pub fn export_history_json(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string_pretty(&self.history)?)
    }

    /// Token that aborts the turn in progress when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a fresh token after a cancellation so later turns can run.
    pub fn reset_cancellation(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    /// Drop the conversation, keeping the system prompt.
    pub fn clear(&mut self) {
        self.history.retain(|m| m.role == Role::System);
        self.history.truncate(1);
        tracing::info!(session_id = %self.id, "history cleared");
    }

    // ─── Turn ───────────────────────────────────────────────────────────

    /// Run one user turn to completion.
    ///
    /// Provider failures come back as an `Ok` outcome whose `error` is set.
    /// On `Err` (cancellation) the history is restored to its state before
    /// the turn.
    pub async fn run_turn(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
        let snapshot = self.history.clone();
        let cancel = self.cancel.clone();

        match self.drive_turn(input, &cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "turn aborted, history restored");
                self.history = snapshot;
                Err(e)
            }
        }
    }

    async fn drive_turn(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        tracing::info!(
            session_id = %self.id,
            input_len = input.len(),
            input_preview = %preview(input, 80),
            "turn started"
        );

        let user = Message::user(input);
        let incoming = if self.settings.enable_message_chunking {
            chunk_if_oversized(user, &self.chunking)
        } else {
            vec![user]
        };

        let window = self.message_window();
        if incoming.len() > window {
            tracing::warn!(
                session_id = %self.id,
                chunks = incoming.len(),
                window,
                "input does not fit the message window, not sending"
            );
            let response =
                oversized_input_response(self.family, incoming.len(), window, self.history.len());
            return Ok(TurnOutcome {
                content: response.content.unwrap_or_default(),
                tool_calls: Vec::new(),
                rounds: 0,
                finish_reason: response.finish_reason,
                usage: Usage::default(),
                error: response.error,
            });
        }
        self.history.extend(incoming);

        let max_rounds = self.settings.max_tool_call_rounds;
        let mut usage = Usage::default();
        let mut rounds: u32 = 0;
        let mut response = self.request_model(cancel, &mut usage).await?;

        while response.has_tool_calls() && rounds < max_rounds {
            let calls = std::mem::take(&mut response.tool_calls);
            let text = response
                .content
                .take()
                .filter(|t| !t.trim().is_empty() && !is_placeholder(t));
            self.history
                .push(Message::assistant_tool_calls(self.family, text.as_deref(), &calls));

            tracing::info!(
                session_id = %self.id,
                round = rounds + 1,
                max_rounds,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "executing tool round"
            );

            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = self.router.dispatch_tool_calls(&calls) => r,
            };
            self.history.extend(Message::tool_results(self.family, results));
            rounds += 1;

            response = self.request_model(cancel, &mut usage).await?;
        }

        let mut content = response.content.take().unwrap_or_default();
        if is_placeholder(&content) {
            tracing::warn!(session_id = %self.id, "model echoed the tool-results marker, treating as empty");
            content.clear();
        }

        if response.has_tool_calls() {
            let pending = response.tool_calls.len();
            tracing::warn!(
                session_id = %self.id,
                rounds,
                pending,
                "tool-call round limit reached"
            );
            let note = round_limit_note(max_rounds, pending);
            content = if content.trim().is_empty() {
                note
            } else {
                format!("{content}\n\n{note}")
            };
            response.tool_calls.clear();
        }

        // Synthesized error text stays out of the conversation.
        if response.error.is_none() && !content.is_empty() {
            self.history.push(Message::assistant(content.clone()));
        }

        tracing::info!(
            session_id = %self.id,
            rounds,
            content_len = content.len(),
            history_len = self.history.len(),
            context_chars = self.context_size(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            error = response.error.is_some(),
            "turn finished"
        );

        Ok(TurnOutcome {
            content,
            tool_calls: response.tool_calls,
            rounds,
            finish_reason: response.finish_reason,
            usage,
            error: response.error,
        })
    }

    /// Messages a trim leaves room for besides the pinned system prompt.
    fn message_window(&self) -> usize {
        let pinned = self.trim.preserve_system
            && self.history.first().map(|m| m.role) == Some(Role::System);
        self.trim.max_messages.max(1).saturating_sub(usize::from(pinned))
    }

    /// Fit the history to its budgets, send it, and adopt any fallback
    /// history the retry controller produced.
    async fn request_model(
        &mut self,
        cancel: &CancellationToken,
        usage: &mut Usage,
    ) -> Result<ModelResponse, AgentError> {
        let trimmed = trim(&mut self.history, &self.trim);
        let truncated = truncate_tool_messages(&mut self.history, &self.budgets);
        tracing::debug!(
            session_id = %self.id,
            before = trimmed.before,
            after = trimmed.after,
            orphans_removed = trimmed.orphans_removed,
            results_cut = truncated.entries_cut(),
            "context prepared"
        );

        let request = ModelRequest {
            messages: self.history.clone(),
            tools: self.tools.clone(),
            temperature: self.sampling.temperature,
            max_output_tokens: self.sampling.max_output_tokens,
        };
        let outcome = self.retry.send(self.endpoint.as_ref(), request, cancel).await?;

        if let Some(reduced) = outcome.reduced_history {
            tracing::info!(
                session_id = %self.id,
                before = self.history.len(),
                after = reduced.len(),
                "adopting fallback history"
            );
            self.history = reduced;
        }
        if let Some(u) = &outcome.response.usage {
            usage.add(u);
        }
        Ok(outcome.response)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
