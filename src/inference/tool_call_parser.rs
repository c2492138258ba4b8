//! Tool call parsing for the inline-marker model family.
//!
//! Models in this family have no structured tool-call channel. They are told
//! (in the system prompt) to emit calls in their free text, and two
//! conventions are accepted:
//!
//! 1. **Tagged JSON** (tried first):
//!    ```text
//!    <tool_call>{"name": "weather.lookup", "arguments": {"city": "Oslo"}}</tool_call>
//!    ```
//!
//! 2. **Line pairs**:
//!    ```text
//!    Tool: weather.lookup
//!    Arguments: {"city": "Oslo"}
//!    ```
//!
//! Parsed calls get a generated `call_<uuid>` ID unless the tagged JSON
//! carries its own `id`.

use uuid::Uuid;

use super::errors::InferenceError;
use super::types::ToolInvocation;

pub const TOOL_CALL_START: &str = "<tool_call>";
pub const TOOL_CALL_END: &str = "</tool_call>";

/// Extract tool calls from model text. Tagged blocks win over line pairs.
pub fn parse_inline_tool_calls(text: &str) -> Result<Vec<ToolInvocation>, InferenceError> {
    let calls = parse_tagged_tool_calls(text)?;
    if !calls.is_empty() {
        return Ok(calls);
    }
    parse_line_pair_tool_calls(text)
}

/// Remove tool-call markup from model text, leaving the prose around it.
pub fn strip_tool_call_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(TOOL_CALL_START) {
        out.push_str(&rest[..start]);
        let after = &rest[start + TOOL_CALL_START.len()..];
        match after.find(TOOL_CALL_END) {
            Some(end) => rest = &after[end + TOOL_CALL_END.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    // Line-pair calls: drop `Tool:` lines and the `Arguments:` line after them.
    let mut kept = Vec::new();
    let mut skip_args = false;
    for line in out.lines() {
        let trimmed = line.trim();
        if tool_line_name(trimmed).is_some() {
            skip_args = true;
            continue;
        }
        if skip_args && arguments_line(trimmed).is_some() {
            skip_args = false;
            continue;
        }
        skip_args = false;
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

/// Render a call in the tagged convention (used when replaying history).
pub fn render_tool_call(call: &ToolInvocation) -> String {
    let body = serde_json::json!({
        "id": call.id,
        "name": call.name,
        "arguments": call.arguments,
    });
    format!("{TOOL_CALL_START}{body}{TOOL_CALL_END}")
}

// ─── Tagged JSON ─────────────────────────────────────────────────────────────

fn parse_tagged_tool_calls(text: &str) -> Result<Vec<ToolInvocation>, InferenceError> {
    let mut calls = Vec::new();
    let mut search_from = 0;

    while let Some(start_offset) = text[search_from..].find(TOOL_CALL_START) {
        let abs_start = search_from + start_offset + TOOL_CALL_START.len();
        let Some(end_offset) = text[abs_start..].find(TOOL_CALL_END) else {
            break;
        };
        let block = text[abs_start..abs_start + end_offset].trim();
        search_from = abs_start + end_offset + TOOL_CALL_END.len();

        if block.is_empty() {
            continue;
        }

        let value: serde_json::Value =
            serde_json::from_str(block).map_err(|e| InferenceError::ToolCallParseError {
                raw_response: block.to_string(),
                reason: format!("invalid JSON in tool call block: {e}"),
            })?;

        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| InferenceError::ToolCallParseError {
                raw_response: block.to_string(),
                reason: "tool call block has no name".into(),
            })?;

        let arguments = match value.get("arguments") {
            // Some models double-encode the arguments object as a string.
            Some(serde_json::Value::String(s)) => {
                serde_json::from_str(s).map_err(|e| InferenceError::ToolCallParseError {
                    raw_response: s.clone(),
                    reason: format!("invalid JSON arguments: {e}"),
                })?
            }
            Some(v) => v.clone(),
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        let id = value
            .get("id")
            .and_then(|i| i.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

        calls.push(ToolInvocation {
            id,
            name: name.to_string(),
            arguments,
        });
    }

    Ok(calls)
}

// ─── Line Pairs ──────────────────────────────────────────────────────────────

fn tool_line_name(line: &str) -> Option<&str> {
    line.strip_prefix("Tool:")
        .or_else(|| line.strip_prefix("tool:"))
        .map(str::trim)
        .filter(|n| !n.is_empty())
}

fn arguments_line(line: &str) -> Option<&str> {
    line.strip_prefix("Arguments:")
        .or_else(|| line.strip_prefix("arguments:"))
        .map(str::trim)
}

fn parse_line_pair_tool_calls(text: &str) -> Result<Vec<ToolInvocation>, InferenceError> {
    let mut calls = Vec::new();
    let lines: Vec<&str> = text.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        if let Some(name) = tool_line_name(lines[i].trim()) {
            let next = lines.get(i + 1).map(|l| l.trim());
            let arguments = match next.and_then(arguments_line) {
                Some(args) => {
                    i += 1; // consume the arguments line
                    serde_json::from_str(args).map_err(|e| InferenceError::ToolCallParseError {
                        raw_response: args.to_string(),
                        reason: format!("invalid Arguments JSON: {e}"),
                    })?
                }
                None => serde_json::Value::Object(serde_json::Map::new()),
            };

            calls.push(ToolInvocation {
                id: format!("call_{}", Uuid::new_v4()),
                name: name.to_string(),
                arguments,
            });
        }
        i += 1;
    }

    Ok(calls)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
