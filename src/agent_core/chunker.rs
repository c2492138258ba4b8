//! Splitting of oversized dialogue messages.
//!
//! A user message larger than `max_message_size` characters is replaced by
//! several messages of the same role, each annotated with `[CHUNK i/N]`. The
//! first chunk also carries a note explaining the split.
//!
//! Only plain dialogue is chunked. Messages that carry tool linkage are left
//! to the truncator, and system messages are never split (there may be only
//! one, at index 0).

use crate::inference::types::{Message, MessageContent, Role};

use super::tokens::{char_len, char_offset};
use super::types::ChunkingStrategy;

/// Paragraph separator preferred by the context-aware strategy.
const PARAGRAPH_BREAK: &str = "\n\n";

/// Sentence endings tried when no paragraph break is in range.
const SENTENCE_ENDS: &[&str] = &[". ", "! ", "? ", ".\n", "!\n", "?\n"];

/// Fraction of `chunk_size` searched backwards for a boundary.
const BOUNDARY_TOLERANCE_DIVISOR: usize = 5;

/// Chunking parameters, all in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub max_message_size: usize,
    pub chunk_size: usize,
    pub overlap: usize,
    pub strategy: ChunkingStrategy,
}

/// Whether `message` is eligible for chunking at all.
fn is_chunkable(message: &Message) -> bool {
    matches!(message.role, Role::User | Role::Assistant)
        && matches!(message.content, MessageContent::Text(_))
        && !message.carries_tool_invocations()
        && !message.carries_tool_results()
}

/// Split `message` if it is oversized dialogue; otherwise return it as is.
pub fn chunk_if_oversized(message: Message, settings: &ChunkSettings) -> Vec<Message> {
    if !is_chunkable(&message) {
        return vec![message];
    }
    let MessageContent::Text(text) = &message.content else {
        return vec![message];
    };
    let original_chars = char_len(text);
    if original_chars <= settings.max_message_size {
        return vec![message];
    }

    let bodies = match settings.strategy {
        ChunkingStrategy::Simple => split_simple(text, settings.chunk_size, settings.overlap),
        ChunkingStrategy::PreserveContext => {
            split_at_boundaries(text, settings.chunk_size, settings.overlap)
        }
    };
    let total = bodies.len();

    tracing::info!(
        role = ?message.role,
        original_chars,
        chunks = total,
        strategy = ?settings.strategy,
        "split oversized message"
    );

    bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| {
            let header = if i == 0 {
                format!(
                    "[NOTE: This message was too large ({original_chars} chars) and has been \
                     split into {total} parts.]\n[CHUNK 1/{total}]\n"
                )
            } else {
                format!("[CHUNK {}/{total}]\n", i + 1)
            };
            Message {
                role: message.role,
                content: MessageContent::Text(format!("{header}{body}")),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            }
        })
        .collect()
}

// ─── Strategies ─────────────────────────────────────────────────────────────

/// Fixed windows of `chunk_size` chars; consecutive windows share `overlap`.
fn split_simple(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut out = Vec::new();
    let mut start = 0; // byte offset
    loop {
        let rest = &text[start..];
        let end = start + char_offset(rest, chunk_size);
        out.push(&text[start..end]);
        if end >= text.len() {
            break;
        }
        start += char_offset(rest, step);
    }
    out
}

/// Windows that end at a paragraph break, else a sentence end, within the
/// last fifth of the window. Without a boundary the cut is hard and the
/// next chunk repeats `overlap` chars.
fn split_at_boundaries(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let tolerance = (chunk_size / BOUNDARY_TOLERANCE_DIVISOR).max(1);

    let mut out = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let rest = &text[start..];
        let hard_end = start + char_offset(rest, chunk_size);
        if hard_end >= text.len() {
            out.push(rest);
            break;
        }

        let window_start = start + char_offset(rest, chunk_size - tolerance.min(chunk_size));
        let window = &text[window_start..hard_end];

        match find_boundary(window) {
            Some(offset) if window_start + offset > start => {
                let end = window_start + offset;
                out.push(&text[start..end]);
                start = end;
            }
            _ => {
                out.push(&text[start..hard_end]);
                let step = chunk_size.saturating_sub(overlap).max(1);
                start += char_offset(rest, step);
            }
        }
    }
    out
}

/// Byte offset just past the last preferred boundary in `window`.
fn find_boundary(window: &str) -> Option<usize> {
    if let Some(pos) = window.rfind(PARAGRAPH_BREAK) {
        return Some(pos + PARAGRAPH_BREAK.len());
    }
    SENTENCE_ENDS
        .iter()
        .filter_map(|end| window.rfind(end).map(|pos| pos + end.len()))
        .max()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{ModelFamily, ToolResult};

    fn settings(strategy: ChunkingStrategy) -> ChunkSettings {
        ChunkSettings {
            max_message_size: 100,
            chunk_size: 40,
            overlap: 10,
            strategy,
        }
    }

    /// Body of a chunk with its annotation lines removed.
    fn body(msg: &Message) -> String {
        let text = msg.text();
        let after = text.split_once("]\n").map(|(_, b)| b).unwrap_or(&text);
        match after.strip_prefix("[CHUNK ") {
            Some(rest) => rest.split_once("]\n").map(|(_, b)| b).unwrap_or(rest).to_string(),
            None => after.to_string(),
        }
    }

    #[test]
    fn test_small_message_untouched() {
        let msg = Message::user("short");
        assert_eq!(chunk_if_oversized(msg.clone(), &settings(ChunkingStrategy::Simple)), vec![msg]);
    }

    #[test]
    fn test_tool_and_system_messages_never_chunked() {
        let big = "x".repeat(1_000);
        let tool = Message::tool_results(
            ModelFamily::Separate,
            vec![ToolResult {
                tool_call_id: "a".into(),
                content: big.clone(),
                is_error: false,
            }],
        )
        .remove(0);
        assert_eq!(chunk_if_oversized(tool, &settings(ChunkingStrategy::Simple)).len(), 1);
        assert_eq!(
            chunk_if_oversized(Message::system(big), &settings(ChunkingStrategy::Simple)).len(),
            1
        );
    }

    #[test]
    fn test_annotations() {
        let text: String = (0..150).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_if_oversized(Message::user(text), &settings(ChunkingStrategy::Simple));
        let n = chunks.len();
        assert!(n > 1);
        assert!(chunks[0].text().starts_with("[NOTE: This message was too large (150 chars)"));
        assert!(chunks[0].text().contains(&format!("[CHUNK 1/{n}]")));
        assert!(chunks[1].text().starts_with(&format!("[CHUNK 2/{n}]\n")));
        assert!(!chunks[1].text().contains("NOTE"));
        assert!(chunks.iter().all(|c| c.role == Role::User));
    }

    #[test]
    fn test_simple_chunks_reconstruct_original() {
        let text: String = (0..257).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let s = settings(ChunkingStrategy::Simple);
        let chunks = chunk_if_oversized(Message::user(text.clone()), &s);

        let mut rebuilt = body(&chunks[0]);
        for c in &chunks[1..] {
            let b = body(c);
            rebuilt.push_str(&b[s.overlap..]);
        }
        assert_eq!(rebuilt, text);
        assert!(chunks.iter().all(|c| char_len(&body(c)) <= s.chunk_size));
    }

    #[test]
    fn test_simple_split_multibyte() {
        let text = "═".repeat(95);
        let parts = split_simple(&text, 40, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(char_len(parts[0]), 40);
        assert_eq!(char_len(parts[2]), 35);
    }

    #[test]
    fn test_context_aware_prefers_paragraph_break() {
        let first = format!("{}\n\n", "a".repeat(33));
        let text = format!("{first}{}", "b".repeat(80));
        let parts = split_at_boundaries(&text, 40, 10);
        assert_eq!(parts[0], first);
        assert!(parts[1].starts_with('b'));
    }

    #[test]
    fn test_context_aware_falls_back_to_sentence_then_hard_cut() {
        let sentence = format!("{}. ", "a".repeat(34));
        let text = format!("{sentence}{}", "b".repeat(80));
        let parts = split_at_boundaries(&text, 40, 10);
        assert_eq!(parts[0], sentence);

        let solid = "c".repeat(100);
        let parts = split_at_boundaries(&solid, 40, 10);
        assert_eq!(char_len(parts[0]), 40);
        // Hard cut: next chunk repeats the overlap.
        assert_eq!(char_len(parts[1]), 40);
        assert_eq!(parts.len(), 3);
    }
}
