//! Wire-shape codecs, one per model family.
//!
//! Everything above this module works on the canonical [`Message`]. The
//! adapters are the only place that knows what a family's request body and
//! response body look like. Encoding accepts history in any shape (a session
//! can switch families mid-conversation) and re-expresses it in the target
//! family's shape using the shape-independent accessors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::InferenceError;
use super::tool_call_parser::{parse_inline_tool_calls, render_tool_call, strip_tool_call_markup};
use super::types::{
    extract_tool_invocations, extract_tool_results, Message, ModelFamily, ModelRequest,
    ModelResponse, Role, ToolDefinition, Usage, TOOL_RESULTS_MARKER,
};

/// Path (relative to the configured base URL) a family's requests go to.
pub fn endpoint_path(family: ModelFamily) -> &'static str {
    match family {
        ModelFamily::Embedded => "/messages",
        ModelFamily::Separate | ModelFamily::InlineMarker => "/chat/completions",
    }
}

/// Encode a canonical request into `family`'s JSON body.
pub fn encode_request(
    family: ModelFamily,
    model: &str,
    request: &ModelRequest,
) -> Result<serde_json::Value, InferenceError> {
    let body = match family {
        ModelFamily::Embedded => serde_json::to_value(encode_embedded(model, request)),
        ModelFamily::Separate => serde_json::to_value(encode_separate(model, request)),
        ModelFamily::InlineMarker => serde_json::to_value(encode_inline(model, request)),
    };
    body.map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to encode {family} request: {e}"),
    })
}

/// Decode a successful response body from `family` into canonical form.
pub fn decode_response(family: ModelFamily, body: &str) -> Result<ModelResponse, InferenceError> {
    match family {
        ModelFamily::Embedded => decode_embedded(body),
        ModelFamily::Separate => decode_chat_completion(body, false),
        ModelFamily::InlineMarker => decode_chat_completion(body, true),
    }
}

// ─── Embedded (content blocks) ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BlocksRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<BlocksMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<BlocksTool>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct BlocksMessage {
    role: &'static str,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct BlocksTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn encode_embedded(model: &str, request: &ModelRequest) -> BlocksRequest {
    let mut system_parts = Vec::new();
    let mut messages: Vec<BlocksMessage> = Vec::new();

    for msg in &request.messages {
        if msg.role == Role::System {
            system_parts.push(msg.text());
            continue;
        }

        let mut blocks = Vec::new();
        let text = msg.text();
        if msg.has_dialogue_text() {
            blocks.push(serde_json::json!({"type": "text", "text": text}));
        }
        for call in extract_tool_invocations(msg) {
            blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            }));
        }
        for result in extract_tool_results(msg) {
            blocks.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }
        if blocks.is_empty() {
            continue;
        }

        // Results travel on user turns; consecutive same-role turns merge.
        let role = match msg.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(BlocksMessage {
                role,
                content: blocks,
            }),
        }
    }

    BlocksRequest {
        model: model.to_string(),
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages,
        tools: request
            .tools
            .iter()
            .map(|t| BlocksTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_output_tokens,
    }
}

fn decode_embedded(body: &str) -> Result<ModelResponse, InferenceError> {
    #[derive(Deserialize)]
    struct BlocksResponse {
        #[serde(default)]
        content: Vec<ResponseBlock>,
        stop_reason: Option<String>,
        usage: Option<BlocksUsage>,
    }

    #[derive(Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum ResponseBlock {
        Text {
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
            #[serde(default)]
            input: serde_json::Value,
        },
        #[serde(other)]
        Other,
    }

    #[derive(Deserialize)]
    struct BlocksUsage {
        #[serde(default)]
        input_tokens: u32,
        #[serde(default)]
        output_tokens: u32,
    }

    let resp: BlocksResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::DecodeError {
            reason: format!("failed to parse content-block response: {e}"),
        })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            ResponseBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t);
            }
            ResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(super::types::ToolInvocation {
                    id,
                    name,
                    arguments: input,
                });
            }
            ResponseBlock::Other => {}
        }
    }

    let finish_reason = match resp.stop_reason.as_deref() {
        Some("tool_use") => Some("tool_calls".to_string()),
        Some("end_turn") => Some("stop".to_string()),
        other => other.map(String::from),
    };

    Ok(ModelResponse {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        usage: resp.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
        finish_reason,
        error: None,
    })
}

// ─── Separate (chat completions) ─────────────────────────────────────────────

/// A message in the chat-completions wire format.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(serialize_with = "serialize_content")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallWire>>,
}

/// Emit `""` instead of `null` for missing content.
///
/// Several OpenAI-compatible runtimes reject `null` content fields.
fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(value.as_deref().unwrap_or_default())
}

#[derive(Debug, Clone, Serialize)]
struct ToolCallWire {
    id: String,
    r#type: &'static str,
    function: FunctionCallWire,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionCallWire {
    name: String,
    /// JSON-encoded arguments object.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ToolDefinitionWire {
    r#type: &'static str,
    function: FunctionDefinitionWire,
}

#[derive(Debug, Serialize)]
struct FunctionDefinitionWire {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinitionWire>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn encode_separate(model: &str, request: &ModelRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len());

    for msg in &request.messages {
        let results = extract_tool_results(msg);
        if !results.is_empty() {
            // Keep any dialogue text, then one `tool` message per result.
            if msg.role != Role::Tool && msg.has_dialogue_text() {
                messages.push(ChatMessage {
                    role: role_str(msg.role),
                    content: Some(msg.text()),
                    tool_call_id: None,
                    tool_calls: None,
                });
            }
            messages.extend(results.into_iter().map(|r| ChatMessage {
                role: "tool",
                content: Some(r.content.to_string()),
                tool_call_id: Some(r.tool_call_id.to_string()),
                tool_calls: None,
            }));
            continue;
        }

        let calls = extract_tool_invocations(msg);
        let text = msg.text();
        messages.push(ChatMessage {
            role: role_str(msg.role),
            content: (!text.is_empty()).then_some(text),
            tool_call_id: None,
            tool_calls: (!calls.is_empty()).then(|| {
                calls
                    .into_iter()
                    .map(|c| ToolCallWire {
                        id: c.id,
                        r#type: "function",
                        function: FunctionCallWire {
                            name: c.name,
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
        });
    }

    let tools: Option<Vec<ToolDefinitionWire>> = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| ToolDefinitionWire {
                r#type: "function",
                function: FunctionDefinitionWire {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    });

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tool_choice: tools.as_ref().map(|_| "auto"),
        tools,
        temperature: request.temperature,
        max_tokens: request.max_output_tokens,
        stream: false,
    }
}

/// Parse a non-streaming chat-completions body. With `inline`, tool calls are
/// read out of the text instead of the `tool_calls` field.
fn decode_chat_completion(body: &str, inline: bool) -> Result<ModelResponse, InferenceError> {
    #[derive(Deserialize)]
    struct CompletionResponse {
        choices: Vec<CompletionChoice>,
        usage: Option<CompletionUsage>,
    }

    #[derive(Deserialize)]
    struct CompletionChoice {
        message: CompletionMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct CompletionMessage {
        content: Option<String>,
        tool_calls: Option<Vec<CompletionToolCall>>,
    }

    #[derive(Deserialize)]
    struct CompletionToolCall {
        id: Option<String>,
        function: CompletionFunction,
    }

    #[derive(Deserialize)]
    struct CompletionFunction {
        name: String,
        arguments: String,
    }

    #[derive(Deserialize)]
    struct CompletionUsage {
        #[serde(default)]
        prompt_tokens: u32,
        #[serde(default)]
        completion_tokens: u32,
    }

    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::DecodeError {
            reason: format!("failed to parse chat completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::DecodeError {
            reason: "empty choices array".into(),
        })?;

    let mut content = choice.message.content.filter(|c| !c.is_empty());
    let mut tool_calls = Vec::new();

    for tc in choice.message.tool_calls.unwrap_or_default() {
        let arguments = if tc.function.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&tc.function.arguments).map_err(|e| {
                InferenceError::ToolCallParseError {
                    raw_response: tc.function.arguments.clone(),
                    reason: format!("invalid JSON: {e}"),
                }
            })?
        };
        tool_calls.push(super::types::ToolInvocation {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    if inline && tool_calls.is_empty() {
        if let Some(text) = content.take() {
            tool_calls = parse_inline_tool_calls(&text)?;
            let prose = if tool_calls.is_empty() {
                text
            } else {
                strip_tool_call_markup(&text)
            };
            content = (!prose.is_empty()).then_some(prose);
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(ModelResponse {
        content,
        tool_calls,
        usage: resp.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        finish_reason,
        error: None,
    })
}

// ─── Inline marker (plain text) ──────────────────────────────────────────────

/// System-prompt section describing the available tools and how to call them.
fn tool_instructions(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "You can call tools. To call one, reply with a block of the form\n\
         <tool_call>{\"name\": \"tool.name\", \"arguments\": {...}}</tool_call>\n\
         Results come back in a user message starting with ",
    );
    out.push_str(TOOL_RESULTS_MARKER);
    out.push_str(".\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    out
}

fn render_tool_results(msg: &Message) -> String {
    let mut out = String::from(TOOL_RESULTS_MARKER);
    for r in extract_tool_results(msg) {
        let status = if r.is_error { "error" } else { "ok" };
        out.push_str(&format!(
            "\n<tool_result id=\"{}\" status=\"{status}\">\n{}\n</tool_result>",
            r.tool_call_id, r.content
        ));
    }
    out
}

fn encode_inline(model: &str, request: &ModelRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    let instructions = (!request.tools.is_empty()).then(|| tool_instructions(&request.tools));

    let has_system = request.messages.first().map(|m| m.role) == Some(Role::System);
    if !has_system {
        if let Some(text) = &instructions {
            messages.push(ChatMessage {
                role: "system",
                content: Some(text.clone()),
                tool_call_id: None,
                tool_calls: None,
            });
        }
    }

    for (i, msg) in request.messages.iter().enumerate() {
        let content = if msg.role == Role::System && i == 0 {
            match &instructions {
                Some(extra) => format!("{}\n\n{extra}", msg.text()),
                None => msg.text(),
            }
        } else if msg.carries_tool_results() {
            render_tool_results(msg)
        } else {
            let mut text = msg.text();
            for call in extract_tool_invocations(msg) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&render_tool_call(&call));
            }
            text
        };

        // No `tool` role on the wire for this family.
        let role = match msg.role {
            Role::Tool => "user",
            other => role_str(other),
        };
        messages.push(ChatMessage {
            role,
            content: Some(content),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tools: None,
        tool_choice: None,
        temperature: request.temperature,
        max_tokens: request.max_output_tokens,
        stream: false,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
