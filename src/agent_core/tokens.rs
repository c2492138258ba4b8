//! Size measurement for context budgets.
//!
//! Every budget in the agent core is expressed in characters, used as a
//! stand-in for tokens. Character counts (not bytes) keep budgets stable
//! across scripts: a CJK tool result and an ASCII one of the same length
//! cost the same.

use crate::inference::types::{extract_tool_invocations, extract_tool_results, Message};

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// If the byte at `max_bytes` is inside a multi-byte character, the slice is
/// shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Byte offset of the `n`th character, or `s.len()` if there are fewer.
pub fn char_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// The first `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    &s[..char_offset(s, max_chars)]
}

/// Length of `s` in characters.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ─── Truncation Marker ──────────────────────────────────────────────────────

/// Marker appended to truncated content. Keeps the original size visible to
/// the model and to anyone reading logs.
pub fn truncation_marker(original_chars: usize) -> String {
    format!("\n\n[... truncated from {original_chars} chars total ...]")
}

/// Cut `content` to `target_chars` characters and append the marker.
///
/// Returns the original size in characters. A no-op when the content already
/// fits. The result is never longer than the original, marker included.
pub fn truncate_in_place(content: &mut String, target_chars: usize) -> usize {
    let original = char_len(content);
    if original <= target_chars {
        return original;
    }
    let marker = truncation_marker(original);
    let keep = target_chars.min(original.saturating_sub(char_len(&marker)));
    let cut = char_offset(content, keep);
    content.truncate(cut);
    content.push_str(&marker);
    original
}

// ─── Message Sizes ──────────────────────────────────────────────────────────

/// Characters a message contributes to a request: text, tool-call arguments,
/// and tool-result payloads.
pub fn message_chars(msg: &Message) -> usize {
    let text = char_len(&msg.text());
    let calls: usize = extract_tool_invocations(msg)
        .iter()
        .map(|c| char_len(&c.name) + char_len(&c.arguments.to_string()))
        .sum();
    let results: usize = extract_tool_results(msg)
        .iter()
        .map(|r| char_len(r.content))
        .sum();
    text + calls + results
}

/// Total characters across a history.
pub fn history_chars(messages: &[Message]) -> usize {
    messages.iter().map(message_chars).sum()
}

/// One-line preview for logs.
pub fn preview(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars);
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head.replace('\n', " ")
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
