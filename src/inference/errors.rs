//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries and to decide how to recover.

use serde::Serialize;
use thiserror::Error;

use super::types::ModelFamily;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Failed to parse a tool call from the model's response.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError { raw_response: String, reason: String },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be read off the wire.
    #[error("response error: {reason}")]
    ResponseError { reason: String },

    /// The response body arrived but is not a valid response for the family.
    #[error("decode error: {reason}")]
    DecodeError { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

/// How the retry controller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Validation or permission problems. Retrying cannot help.
    Fatal,
    /// Timeouts, transport errors, overloaded servers.
    Transient,
    /// The request did not fit the model's context window.
    ContextOverflow,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Fatal => "fatal",
            ErrorClass::Transient => "transient",
            ErrorClass::ContextOverflow => "context_overflow",
        }
    }
}

// ─── Context-overflow markers ───────────────────────────────────────────────

/// Markers every family may produce (lowercase).
const COMMON_OVERFLOW_MARKERS: &[&str] = &[
    // oversized input
    "context length",
    "context window",
    "too many tokens",
    "input is too long",
    // request body too large
    "request entity too large",
    "payload too large",
    "request too large",
];

/// Content-block families (lowercase).
const EMBEDDED_OVERFLOW_MARKERS: &[&str] = &[
    "prompt is too long",
    "request_too_large",
    "max_tokens: must be greater than",
    "max_tokens must be greater than",
    "exceed context limit",
];

/// OpenAI-compatible families (lowercase).
const SEPARATE_OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "max_tokens must be at least 1",
    "max_tokens is too large",
    "string_above_max_length",
];

/// Text-marker families, typically hosted open-weight models (lowercase).
const INLINE_OVERFLOW_MARKERS: &[&str] = &[
    "too many input tokens",
    "max_gen_len must be",
    "max_new_tokens must be",
    "failed to parse tokenizer",
    "tokenizer error",
    "exceeds the maximum number of tokens",
];

/// Overflow markers for `family`, most specific first.
pub fn overflow_markers(family: ModelFamily) -> impl Iterator<Item = &'static str> {
    let specific: &[&str] = match family {
        ModelFamily::Embedded => EMBEDDED_OVERFLOW_MARKERS,
        ModelFamily::Separate => SEPARATE_OVERFLOW_MARKERS,
        ModelFamily::InlineMarker => INLINE_OVERFLOW_MARKERS,
    };
    specific.iter().chain(COMMON_OVERFLOW_MARKERS.iter()).copied()
}

impl InferenceError {
    /// The server-supplied text of the error, if any: the body of an
    /// `HttpError`, or the reason of a `ResponseError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            InferenceError::ResponseError { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether the error text carries one of `family`'s overflow markers.
    pub fn is_context_overflow(&self, family: ModelFamily) -> bool {
        if matches!(self, InferenceError::HttpError { status: 413, .. }) {
            return true;
        }
        let Some(text) = self.error_body().map(str::to_lowercase) else {
            return false;
        };
        overflow_markers(family).any(|m| text.contains(m))
    }

    /// Classify the error for the retry controller.
    pub fn classify(&self, family: ModelFamily) -> ErrorClass {
        if self.is_context_overflow(family) {
            return ErrorClass::ContextOverflow;
        }
        match self {
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => {
                ErrorClass::Transient
            }
            InferenceError::HttpError { status, .. } => match status {
                408 | 409 | 425 | 429 => ErrorClass::Transient,
                500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            InferenceError::ResponseError { .. } => ErrorClass::Transient,
            InferenceError::DecodeError { .. }
            | InferenceError::ToolCallParseError { .. }
            | InferenceError::ConfigError { .. } => ErrorClass::Fatal,
        }
    }
}
