//! Retry and fallback around a single model request.
//!
//! Failures are classified per model family:
//!
//! - **fatal**: answered at once with a graceful error response.
//! - **transient**: retried up to `max_retries` times with jittered backoff.
//!   The sleep races the session's cancellation token.
//! - **context overflow**: the first one rebuilds the request from the
//!   aggressive fallback history and resends without delay. A second
//!   overflow is answered with a graceful error response.
//!
//! The controller only returns `Err` when the session is cancelled.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::inference::client::ModelEndpoint;
use crate::inference::errors::{ErrorClass, InferenceError};
use crate::inference::types::{ErrorMetadata, Message, ModelFamily, ModelRequest, ModelResponse};
use crate::inference::SessionSettings;

use super::conversation::aggressive_fallback;
use super::errors::AgentError;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Upper bound on any single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Jitter added on top of the base delay, as a fraction of it.
const JITTER_MIN: f64 = 0.10;
const JITTER_MAX: f64 = 0.30;

/// `finish_reason` of synthesized error responses.
pub const ERROR_FINISH_REASON: &str = "error";

// ─── Policy ─────────────────────────────────────────────────────────────────

/// Backoff and fallback parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
    /// Message budget the aggressive fallback derives its target from.
    pub max_messages: usize,
    pub preserve_system: bool,
}

impl From<&SessionSettings> for RetryPolicy {
    fn from(s: &SessionSettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: s.retry_base_delay(),
            exponential: s.exponential_backoff,
            max_messages: s.max_conversation_messages,
            preserve_system: s.preserve_system_message,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let scaled = if self.exponential {
            base * 2f64.powi(attempt.min(32) as i32)
        } else {
            base
        };
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        let delay = scaled * (1.0 + jitter);
        Duration::from_secs_f64(delay.min(MAX_DELAY.as_secs_f64()))
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// The answer to one logical request.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub response: ModelResponse,
    /// Requests actually sent.
    pub attempts: u32,
    /// History the aggressive fallback produced, if it ran. Callers should
    /// adopt it: the full history already overflowed once.
    pub reduced_history: Option<Vec<Message>>,
}

// ─── Controller ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Send `request`, recovering from failures as described in the module
    /// docs.
    pub async fn send(
        &self,
        endpoint: &dyn ModelEndpoint,
        mut request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, AgentError> {
        let family = endpoint.family();
        let original_count = request.messages.len();
        let mut attempts: u32 = 0;
        let mut retries: u32 = 0;
        let mut reduced: Option<Vec<Message>> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = endpoint.send(&request) => r,
            };

            let err = match result {
                Ok(response) => {
                    if attempts > 1 {
                        tracing::info!(attempts, "model request succeeded after recovery");
                    }
                    return Ok(SendOutcome {
                        response,
                        attempts,
                        reduced_history: reduced,
                    });
                }
                Err(e) => e,
            };

            let class = err.classify(family);
            tracing::warn!(
                attempt = attempts,
                class = class.as_str(),
                family = %family,
                error = %err,
                "model request failed"
            );

            let failure = Failure {
                class,
                error: &err,
                family,
                attempts,
                original_count,
                fallback_count: reduced.as_ref().map(Vec::len),
            };

            match class {
                ErrorClass::Fatal => {
                    return Ok(SendOutcome {
                        response: graceful_response(&failure),
                        attempts,
                        reduced_history: reduced,
                    });
                }
                ErrorClass::ContextOverflow if reduced.is_none() => {
                    let (history, report) = aggressive_fallback(
                        &request.messages,
                        self.policy.max_messages,
                        self.policy.preserve_system,
                    );
                    tracing::warn!(
                        before = report.before,
                        after = report.after,
                        target = report.target,
                        ultra = report.ultra,
                        messages_shrunk = report.messages_shrunk,
                        "context overflow, resending with aggressive fallback"
                    );
                    request.messages = history.clone();
                    reduced = Some(history);
                }
                ErrorClass::ContextOverflow => {
                    return Ok(SendOutcome {
                        response: graceful_response(&failure),
                        attempts,
                        reduced_history: reduced,
                    });
                }
                ErrorClass::Transient => {
                    if retries >= self.policy.max_retries {
                        return Ok(SendOutcome {
                            response: graceful_response(&failure),
                            attempts,
                            reduced_history: reduced,
                        });
                    }
                    let delay = self.policy.delay_for_attempt(retries);
                    retries += 1;
                    tracing::info!(
                        retry = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

// ─── Graceful Responses ─────────────────────────────────────────────────────

/// Everything known about a failure the controller gave up on.
struct Failure<'a> {
    class: ErrorClass,
    error: &'a InferenceError,
    family: ModelFamily,
    attempts: u32,
    original_count: usize,
    fallback_count: Option<usize>,
}

/// Remediation hints for a failure.
fn hints(class: ErrorClass, family: ModelFamily) -> Vec<String> {
    let mut out: Vec<String> = match class {
        ErrorClass::Fatal => vec![
            "check base_url, model, and api_key in the endpoint configuration".into(),
            "confirm the model accepts the configured tool definitions".into(),
        ],
        ErrorClass::Transient => vec![
            "check that the model server is running and reachable".into(),
            "raise max_retries or retry_base_delay_ms for slow servers".into(),
        ],
        ErrorClass::ContextOverflow => vec![
            "lower max_conversation_messages".into(),
            "lower tool_result_history_threshold and tool_result_new_response_threshold".into(),
            "start a new session".into(),
        ],
    };
    if class == ErrorClass::ContextOverflow {
        match family {
            ModelFamily::Embedded => {
                out.push("lower max_output_tokens; it is reserved out of the same window".into())
            }
            ModelFamily::Separate => {
                out.push("use a model served with a larger context length".into())
            }
            ModelFamily::InlineMarker => out.push(
                "configure fewer tools; their descriptions are sent in the system prompt".into(),
            ),
        }
    }
    out
}

/// Safe, user-facing text for a failure.
fn user_message(failure: &Failure<'_>) -> String {
    match failure.class {
        ErrorClass::Fatal => format!(
            "The model endpoint rejected this request ({}). Please check the configuration.",
            failure.error
        ),
        ErrorClass::Transient => format!(
            "The model endpoint is not responding right now (gave up after {} attempts). \
             Please try again in a moment.",
            failure.attempts
        ),
        ErrorClass::ContextOverflow => match failure.fallback_count {
            Some(n) => format!(
                "This conversation is too large for the model, even after reducing it to \
                 {n} messages. Please start a new session."
            ),
            None => "This conversation is too large for the model. Please start a new session."
                .to_string(),
        },
    }
}

/// Multi-line diagnostic for logs and metadata.
fn diagnostic(failure: &Failure<'_>, hints: &[String]) -> String {
    let fallback = failure
        .fallback_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "not applied".to_string());
    let mut out = format!(
        "model request failed\n  \
         model family: {}\n  \
         error class: {}\n  \
         original message count: {}\n  \
         fallback message count: {fallback}\n  \
         attempts: {}\n  \
         error: {}\n  \
         hints:",
        failure.family,
        failure.class.as_str(),
        failure.original_count,
        failure.attempts,
        failure.error,
    );
    for hint in hints {
        out.push_str("\n    - ");
        out.push_str(hint);
    }
    out
}

fn graceful_response(failure: &Failure<'_>) -> ModelResponse {
    let hints = hints(failure.class, failure.family);
    let diagnostic = diagnostic(failure, &hints);
    tracing::error!(diagnostic = %diagnostic, "returning graceful error response");

    ModelResponse {
        content: Some(user_message(failure)),
        tool_calls: Vec::new(),
        usage: None,
        finish_reason: Some(ERROR_FINISH_REASON.to_string()),
        error: Some(ErrorMetadata {
            class: failure.class,
            message: failure.error.to_string(),
            model_family: failure.family,
            attempts: failure.attempts,
            original_message_count: failure.original_count,
            fallback_message_count: failure.fallback_count,
            diagnostic,
            hints,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    }
}

/// Graceful response for user input that splits into more chunks than the
/// message window holds. Such input is never sent: the trim before the send
/// would drop its leading chunks, header included.
pub(crate) fn oversized_input_response(
    family: ModelFamily,
    parts: usize,
    window: usize,
    history_len: usize,
) -> ModelResponse {
    let class = ErrorClass::ContextOverflow;
    let message = format!("input split into {parts} chunks but the message window holds {window}");
    let hints: Vec<String> = vec![
        "raise chunk_size so long input splits into fewer chunks".into(),
        "raise max_conversation_messages".into(),
    ];
    let mut diagnostic = format!(
        "input not sent\n  \
         model family: {family}\n  \
         error class: {}\n  \
         chunks: {parts}\n  \
         message window: {window}\n  \
         hints:",
        class.as_str(),
    );
    for hint in &hints {
        diagnostic.push_str("\n    - ");
        diagnostic.push_str(hint);
    }
    tracing::error!(diagnostic = %diagnostic, "returning graceful error response");

    ModelResponse {
        content: Some(format!(
            "This message is too long for the conversation window ({parts} chunks, room for \
             {window}). Nothing was sent. Please shorten it or split it up."
        )),
        tool_calls: Vec::new(),
        usage: None,
        finish_reason: Some(ERROR_FINISH_REASON.to_string()),
        error: Some(ErrorMetadata {
            class,
            message,
            model_family: family,
            attempts: 0,
            original_message_count: history_len + parts,
            fallback_message_count: None,
            diagnostic,
            hints,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
