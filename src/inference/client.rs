//! Model endpoint client.
//!
//! [`ModelEndpoint`] is the seam the retry controller talks through. The
//! HTTP implementation, [`InferenceClient`], encodes canonical requests with
//! the family's adapter, posts them, and decodes the answer. It never
//! retries: recovery belongs to the controller, which knows about history.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client as HttpClient;

use super::adapters::{decode_response, encode_request, endpoint_path};
use super::config::EndpointConfig;
use super::errors::InferenceError;
use super::types::{ModelFamily, ModelRequest, ModelResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Version header required by content-block endpoints.
const BLOCKS_API_VERSION: &str = "2023-06-01";

// ─── ModelEndpoint ───────────────────────────────────────────────────────────

/// Something that answers canonical model requests.
pub trait ModelEndpoint: Send + Sync {
    /// Wire family, used to shape tool messages and classify errors.
    fn family(&self) -> ModelFamily;

    /// Send one request. No retries.
    fn send<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> BoxFuture<'a, Result<ModelResponse, InferenceError>>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for a single configured model endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: EndpointConfig,
    url: String,
}

impl InferenceClient {
    /// Build a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn from_config(config: EndpointConfig) -> Result<Self, InferenceError> {
        let url = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            endpoint_path(config.family)
        );

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config, url })
    }

    /// Full URL requests are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn post(&self, request: &ModelRequest) -> Result<ModelResponse, InferenceError> {
        let family = self.config.family;
        let body = encode_request(family, self.model(), request)?;

        // Log the request metadata (not the full body; it can be huge)
        tracing::info!(
            url = %self.url,
            model = %self.model(),
            family = %family,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            max_tokens = request.max_output_tokens,
            "=== LLM REQUEST ==="
        );

        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = match family {
                ModelFamily::Embedded => builder
                    .header("x-api-key", key)
                    .header("anthropic-version", BLOCKS_API_VERSION),
                ModelFamily::Separate | ModelFamily::InlineMarker => builder.bearer_auth(key),
            };
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %crate::agent_core::tokens::truncate_utf8(&body_text, 500),
                "=== LLM ERROR ==="
            );
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseError {
                reason: format!("failed to read response body: {e}"),
            })?;

        let decoded = decode_response(family, &body_text)?;
        tracing::info!(
            content_len = decoded.content.as_ref().map(|c| c.len()).unwrap_or(0),
            tool_calls = decoded.tool_calls.len(),
            finish_reason = ?decoded.finish_reason,
            "=== LLM RESPONSE ==="
        );
        Ok(decoded)
    }
}

impl ModelEndpoint for InferenceClient {
    fn family(&self) -> ModelFamily {
        self.config.family
    }

    fn send<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> BoxFuture<'a, Result<ModelResponse, InferenceError>> {
        Box::pin(self.post(request))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
