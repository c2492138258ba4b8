//! ToolRouter: runs the model's tool calls through a [`ToolExecutor`].
//!
//! Calls run sequentially, each under a per-call timeout. Every outcome,
//! success or failure, becomes a `ToolResult` the model gets to see; a
//! failing tool never aborts the round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::Client as HttpClient;

use crate::agent_core::tokens::truncate_utf8;
use crate::inference::config::ToolRoute;
use crate::inference::types::{ToolDefinition, ToolInvocation, ToolResult};

use super::errors::ToolError;

/// Maximum bytes of an error body kept in a `ToolError::Http`.
const MAX_ERROR_BODY_BYTES: usize = 2_000;

// ─── ToolExecutor ───────────────────────────────────────────────────────────

/// The external collaborator that actually runs tools.
pub trait ToolExecutor: Send + Sync {
    /// Tools advertised to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call. The value is fed back to the model as-is (strings) or
    /// as compact JSON.
    fn execute<'a>(
        &'a self,
        call: &'a ToolInvocation,
    ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>>;
}

/// Render an executor value as result text.
fn render_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

// ─── ToolRouter ─────────────────────────────────────────────────────────────

pub struct ToolRouter {
    executor: Arc<dyn ToolExecutor>,
    timeout: Duration,
}

impl ToolRouter {
    pub fn new(executor: Arc<dyn ToolExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.executor.definitions()
    }

    /// Run a batch of tool calls in order. One result per call.
    pub async fn dispatch_tool_calls(&self, calls: &[ToolInvocation]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.dispatch_single(call).await);
        }
        results
    }

    /// Run one call under the timeout and turn the outcome into a result.
    pub async fn dispatch_single(&self, call: &ToolInvocation) -> ToolResult {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.executor.execute(call)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout {
                name: call.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                let content = render_value(value);
                tracing::info!(
                    tool = %call.name,
                    tool_call_id = %call.id,
                    result_len = content.len(),
                    elapsed_ms,
                    "tool call succeeded"
                );
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content,
                    is_error: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    tool = %call.name,
                    tool_call_id = %call.id,
                    error = %e,
                    elapsed_ms,
                    "tool call failed"
                );
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: e.to_payload(),
                    is_error: true,
                }
            }
        }
    }
}

// ─── HttpToolExecutor ───────────────────────────────────────────────────────

/// Executes tools by POSTing their arguments to configured URLs.
pub struct HttpToolExecutor {
    http: HttpClient,
    routes: HashMap<String, ToolRoute>,
    order: Vec<String>,
}

impl HttpToolExecutor {
    pub fn new(routes: Vec<ToolRoute>) -> Self {
        let order = routes.iter().map(|r| r.name.clone()).collect();
        let routes = routes.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self {
            http: HttpClient::new(),
            routes,
            order,
        }
    }

    async fn post(&self, call: &ToolInvocation) -> Result<serde_json::Value, ToolError> {
        let route = self
            .routes
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.name.clone(),
            })?;

        tracing::debug!(tool = %call.name, url = %route.url, "posting tool call");

        let response = self
            .http
            .post(&route.url)
            .json(&call.arguments)
            .send()
            .await
            .map_err(|e| ToolError::Transport {
                name: call.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ToolError::Transport {
            name: call.name.clone(),
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(ToolError::Http {
                name: call.name.clone(),
                status: status.as_u16(),
                body: truncate_utf8(&body, MAX_ERROR_BODY_BYTES).to_string(),
            });
        }

        // Non-JSON bodies are passed through as text.
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }
}

impl ToolExecutor for HttpToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.routes.get(name))
            .map(|r| ToolDefinition {
                name: r.name.clone(),
                description: r.description.clone(),
                parameters: r.parameters.clone(),
            })
            .collect()
    }

    fn execute<'a>(
        &'a self,
        call: &'a ToolInvocation,
    ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>> {
        Box::pin(self.post(call))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::test_support::ScriptedExecutor;

    fn call(name: &str) -> ToolInvocation {
        ToolInvocation {
            id: format!("id_{name}"),
            name: name.to_string(),
            arguments: serde_json::json!({ "path": "/tmp" }),
        }
    }

    fn router(timeout: Duration) -> ToolRouter {
        ToolRouter::new(Arc::new(ScriptedExecutor::default()), timeout)
    }

    #[tokio::test]
    async fn test_success_renders_json() {
        let result = router(Duration::from_secs(1)).dispatch_single(&call("echo")).await;
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id, "id_echo");
        assert_eq!(result.content, r#"{"path":"/tmp"}"#);
    }

    #[tokio::test]
    async fn test_failures_become_error_results() {
        let results = router(Duration::from_secs(1))
            .dispatch_tool_calls(&[call("fail"), call("nope"), call("echo")])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("disk full"));
        assert!(results[1].is_error);
        assert!(results[1].content.contains("unknown tool 'nope'"));
        assert!(!results[2].is_error);
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let result = router(Duration::from_millis(20)).dispatch_single(&call("slow")).await;
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
    }

    #[test]
    fn test_http_definitions_keep_config_order() {
        let route = |name: &str| ToolRoute {
            name: name.to_string(),
            description: format!("{name} tool"),
            url: format!("http://127.0.0.1:9/{name}"),
            parameters: serde_json::json!({ "type": "object" }),
        };
        let exec = HttpToolExecutor::new(vec![route("zeta"), route("alpha")]);
        let names: Vec<String> = exec.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_http_unknown_and_unreachable() {
        let exec = HttpToolExecutor::new(vec![ToolRoute {
            name: "search".into(),
            description: "search".into(),
            url: "http://127.0.0.1:9/search".into(),
            parameters: serde_json::json!({ "type": "object" }),
        }]);
        let err = exec.execute(&call("other")).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
        let err = exec.execute(&call("search")).await.unwrap_err();
        assert!(matches!(err, ToolError::Transport { .. }));
    }
}
