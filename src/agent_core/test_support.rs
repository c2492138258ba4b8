//! Scripted in-memory collaborators for agent-core tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::inference::client::ModelEndpoint;
use crate::inference::errors::InferenceError;
use crate::inference::types::{
    ModelFamily, ModelRequest, ModelResponse, ToolDefinition, ToolInvocation,
};

use super::errors::ToolError;
use super::tool_router::ToolExecutor;

type Reply = Result<ModelResponse, InferenceError>;

/// Endpoint that replays a fixed script, then falls back to `when_empty`.
pub(crate) struct ScriptedEndpoint {
    family: ModelFamily,
    script: Mutex<VecDeque<Reply>>,
    when_empty: Box<dyn Fn(usize) -> Reply + Send + Sync>,
    /// Every request received, in order.
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedEndpoint {
    pub fn new(family: ModelFamily, script: Vec<Reply>) -> Self {
        Self {
            family,
            script: Mutex::new(script.into()),
            when_empty: Box::new(|_| Ok(ModelResponse::text("done"))),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replace the reply used once the script is exhausted. The closure
    /// receives the 1-based request number.
    pub fn otherwise<F>(mut self, reply: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        self.when_empty = Box::new(reply);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Message counts of every request received.
    pub fn message_counts(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages.len())
            .collect()
    }
}

impl ModelEndpoint for ScriptedEndpoint {
    fn family(&self) -> ModelFamily {
        self.family
    }

    fn send<'a>(&'a self, request: &'a ModelRequest) -> BoxFuture<'a, Reply> {
        let n = {
            let mut seen = self.requests.lock().unwrap();
            seen.push(request.clone());
            seen.len()
        };
        let next = self.script.lock().unwrap().pop_front();
        let reply = next.unwrap_or_else(|| (self.when_empty)(n));
        Box::pin(async move { reply })
    }
}

/// A response asking for one call to `tool` with id `call_{n}`.
pub(crate) fn tool_call_response(tool: &str, n: usize) -> ModelResponse {
    ModelResponse {
        content: None,
        tool_calls: vec![ToolInvocation {
            id: format!("call_{n}"),
            name: tool.to_string(),
            arguments: serde_json::json!({ "n": n }),
        }],
        finish_reason: Some("tool_calls".to_string()),
        ..ModelResponse::default()
    }
}

/// Tool executor with canned behaviour per tool name.
///
/// `echo` returns its arguments, `fail` errors, `slow` sleeps for
/// `slow_for` before answering, `big` returns `big_size` characters.
pub(crate) struct ScriptedExecutor {
    pub slow_for: Duration,
    pub big_size: usize,
    /// Names of every call executed, in order.
    pub calls: Mutex<Vec<String>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            slow_for: Duration::from_secs(5),
            big_size: 1_000,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ToolExecutor for ScriptedExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ["echo", "fail", "slow", "big"]
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: format!("{name} tool"),
                parameters: serde_json::json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }

    fn execute<'a>(
        &'a self,
        call: &'a ToolInvocation,
    ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>> {
        self.calls.lock().unwrap().push(call.name.clone());
        Box::pin(async move {
            match call.name.as_str() {
                "echo" => Ok(call.arguments.clone()),
                "fail" => Err(ToolError::ExecutionFailed {
                    name: call.name.clone(),
                    reason: "disk full".into(),
                }),
                "slow" => {
                    tokio::time::sleep(self.slow_for).await;
                    Ok(serde_json::json!("late"))
                }
                "big" => Ok(serde_json::Value::String("z".repeat(self.big_size))),
                other => Err(ToolError::UnknownTool {
                    name: other.to_string(),
                }),
            }
        })
    }
}
