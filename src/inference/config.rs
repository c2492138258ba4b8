//! Configuration loading and validation.
//!
//! Reads `contextkeeper.yaml` and resolves environment variables. One file
//! holds the model endpoint, the session's context-management settings, and
//! the HTTP tool routes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;
use super::types::ModelFamily;
use crate::agent_core::types::{Budget, ChunkingStrategy, ConversationStrategy, TruncationBudgets};

/// File name searched for upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "contextkeeper.yaml";

/// Env var pointing directly at a config file.
pub const CONFIG_ENV_VAR: &str = "CONTEXTKEEPER_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `contextkeeper.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub tools: Vec<ToolRoute>,
}

/// The model endpoint a session talks to.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Wire shape the endpoint speaks.
    pub family: ModelFamily,
    /// Base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Model identifier sent in the request body.
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    4096
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Context-management settings for one session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Prepended to every new session's history.
    pub system_prompt: Option<String>,
    pub max_conversation_messages: usize,
    pub conversation_strategy: ConversationStrategy,
    pub preserve_system_message: bool,
    pub max_message_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunking_strategy: ChunkingStrategy,
    pub enable_message_chunking: bool,
    pub tool_result_history_threshold: usize,
    pub tool_result_history_target: usize,
    pub tool_result_new_response_threshold: usize,
    pub tool_result_new_response_target: usize,
    pub max_tool_call_rounds: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Per-call limit for tool execution.
    pub tool_timeout_secs: u64,
    /// Smart prune only re-balances when tool messages make up more than
    /// this share of the non-system history.
    pub smart_prune_tool_ratio: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let budgets = TruncationBudgets::default();
        Self {
            system_prompt: None,
            max_conversation_messages: 50,
            conversation_strategy: ConversationStrategy::SlidingWindow,
            preserve_system_message: true,
            max_message_size: 100_000,
            chunk_size: 50_000,
            chunk_overlap: 1_000,
            chunking_strategy: ChunkingStrategy::PreserveContext,
            enable_message_chunking: true,
            tool_result_history_threshold: budgets.history.threshold,
            tool_result_history_target: budgets.history.target,
            tool_result_new_response_threshold: budgets.new_response.threshold,
            tool_result_new_response_target: budgets.new_response.target,
            max_tool_call_rounds: 10,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            exponential_backoff: true,
            tool_timeout_secs: 30,
            smart_prune_tool_ratio: 0.5,
        }
    }
}

impl SessionSettings {
    pub fn budgets(&self) -> TruncationBudgets {
        TruncationBudgets {
            history: Budget::new(
                self.tool_result_history_threshold,
                self.tool_result_history_target,
            ),
            new_response: Budget::new(
                self.tool_result_new_response_threshold,
                self.tool_result_new_response_target,
            ),
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Reject settings the algorithms cannot honour.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let fail = |reason: String| Err(InferenceError::ConfigError { reason });

        if self.max_conversation_messages == 0 {
            return fail("max_conversation_messages must be at least 1".into());
        }
        if self.preserve_system_message && self.max_conversation_messages < 2 {
            return fail(
                "max_conversation_messages must be at least 2 when preserve_system_message is set"
                    .into(),
            );
        }
        for (name, budget) in [
            ("tool_result_history", self.budgets().history),
            ("tool_result_new_response", self.budgets().new_response),
        ] {
            if budget.target >= budget.threshold {
                return fail(format!(
                    "{name}_target ({}) must be below {name}_threshold ({})",
                    budget.target, budget.threshold
                ));
            }
        }
        if self.max_message_size == 0 {
            return fail("max_message_size must be at least 1".into());
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be at least 1".into());
        }
        if self.chunk_overlap >= self.chunk_size {
            return fail(format!(
                "chunk_overlap ({}) must be below chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if !(self.smart_prune_tool_ratio > 0.0 && self.smart_prune_tool_ratio <= 1.0) {
            return fail(format!(
                "smart_prune_tool_ratio ({}) must be in (0, 1]",
                self.smart_prune_tool_ratio
            ));
        }
        Ok(())
    }
}

/// An HTTP endpoint exposed to the model as a tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRoute {
    /// Tool name as the model sees it, e.g. `"weather.lookup"`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Arguments are POSTed here as a JSON object.
    pub url: String,
    /// JSON schema of the arguments object.
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "endpoint.base_url is empty".into(),
            });
        }
        if self.endpoint.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "endpoint.model is empty".into(),
            });
        }
        self.session.validate()?;

        let mut seen = HashSet::new();
        for route in &self.tools {
            if !seen.insert(route.name.as_str()) {
                return Err(InferenceError::ConfigError {
                    reason: format!("duplicate tool route '{}'", route.name),
                });
            }
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `CONTEXTKEEPER_CONFIG`, then `contextkeeper.yaml` in `start` or any
/// parent, then `<config_dir>/contextkeeper/config.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Per-user config dir
    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("contextkeeper").join("config.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, interpolate, parse, and validate the configuration file.
///
/// `${VAR_NAME}` and `${VAR_NAME:-default}` are substituted before parsing.
pub fn load_config(path: &Path) -> Result<AppConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse configuration from YAML text.
pub fn parse_config(raw: &str) -> Result<AppConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    let config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
