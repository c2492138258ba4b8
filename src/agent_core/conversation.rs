//! Conversation trimming: fits history into a message-count budget.
//!
//! Responsibilities:
//! - Apply the configured strategy (sliding window, truncate, smart prune)
//! - Repair tool-call pairing after every trim
//! - Build the aggressive fallback history used after a context overflow
//!
//! Pairing rule: every tool result kept in history must answer an invocation
//! that appears at or before it, and every invocation kept must have a
//! result. Strategies are free to break that rule; the orphan-repair pass
//! that follows every trim restores it.

use std::collections::{HashMap, HashSet};

use crate::inference::config::SessionSettings;
use crate::inference::types::{extract_tool_results, invocation_ids, Message, Role};

use super::tokens::{char_len, char_offset, history_chars, message_chars, truncation_marker};
use super::types::ConversationStrategy;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Messages at the end of history smart prune never drops in its
/// tool-first passes.
const SMART_PRUNE_PROTECTED_TAIL: usize = 4;

/// A conversation with more messages than this is "ultra large".
const ULTRA_MESSAGE_COUNT: usize = 50;

/// A conversation with more characters than this is "ultra large".
const ULTRA_TOTAL_CHARS: usize = 500_000;

/// In ultra-large fallback, messages above this size get cut.
const ULTRA_MESSAGE_CHARS: usize = 10_000;

/// ...down to this many characters across all of their text and results.
const ULTRA_MESSAGE_TARGET: usize = 1_000;

// ─── Settings & Reports ─────────────────────────────────────────────────────

/// Parameters for one trim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimSettings {
    pub max_messages: usize,
    pub preserve_system: bool,
    pub strategy: ConversationStrategy,
    /// Smart prune re-balances only above this tool-message share.
    pub smart_prune_tool_ratio: f64,
}

impl From<&SessionSettings> for TrimSettings {
    fn from(s: &SessionSettings) -> Self {
        Self {
            max_messages: s.max_conversation_messages,
            preserve_system: s.preserve_system_message,
            strategy: s.conversation_strategy,
            smart_prune_tool_ratio: s.smart_prune_tool_ratio,
        }
    }
}

/// What a trim changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub before: usize,
    pub after: usize,
    /// Orphaned results and unanswered calls removed by the repair pass.
    pub orphans_removed: usize,
}

/// What the aggressive fallback changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackReport {
    pub before: usize,
    pub after: usize,
    pub target: usize,
    pub ultra: bool,
    /// Oversized messages cut in ultra mode.
    pub messages_shrunk: usize,
}

// ─── Trim ───────────────────────────────────────────────────────────────────

/// Whether history starts with a system message that must stay at index 0.
fn pinned_system(history: &[Message], preserve_system: bool) -> bool {
    preserve_system && history.first().map(|m| m.role) == Some(Role::System)
}

/// Fit `history` into `settings.max_messages` (clamped to at least 1), then
/// repair orphans. History already within budget is only repaired.
pub fn trim(history: &mut Vec<Message>, settings: &TrimSettings) -> TrimReport {
    let before = history.len();
    let max = settings.max_messages.max(1);

    if history.len() > max {
        match settings.strategy {
            ConversationStrategy::SlidingWindow | ConversationStrategy::Truncate => {
                sliding_window(history, max, settings.preserve_system);
            }
            ConversationStrategy::SmartPrune => {
                smart_prune(
                    history,
                    max,
                    settings.preserve_system,
                    settings.smart_prune_tool_ratio,
                );
            }
        }
    }

    let orphans_removed = repair_orphans(history);
    let report = TrimReport {
        before,
        after: history.len(),
        orphans_removed,
    };

    if report.before != report.after || orphans_removed > 0 {
        tracing::info!(
            strategy = settings.strategy.as_str(),
            max_messages = max,
            before = report.before,
            after = report.after,
            orphans_removed,
            "trimmed conversation"
        );
    }
    report
}

/// Keep the pinned system message (if any) plus the most recent messages.
fn sliding_window(history: &mut Vec<Message>, max: usize, preserve_system: bool) {
    if history.len() <= max {
        return;
    }
    if pinned_system(history, preserve_system) {
        let keep_recent = max.saturating_sub(1);
        let drop_end = history.len() - keep_recent;
        history.drain(1..drop_end);
    } else {
        let drop_end = history.len() - max;
        history.drain(..drop_end);
    }
}

/// Drop tool traffic before dialogue when tool messages dominate.
///
/// Order, oldest first and outside the protected tail:
/// 1. tool-result messages, each taking its call message along once every
///    answer to that message is gone
/// 2. assistant messages that only issue tool calls nobody answers
/// 3. whatever the sliding window drops
///
/// When tool messages are at most `tool_ratio` of the non-system history
/// this is a plain sliding window.
fn smart_prune(history: &mut Vec<Message>, max: usize, preserve_system: bool, tool_ratio: f64) {
    if history.len() <= max {
        return;
    }
    let offset = usize::from(pinned_system(history, preserve_system));
    let body = &history[offset..];
    let tool_messages = body.iter().filter(|m| m.is_tool_message()).count();
    let ratio = tool_messages as f64 / body.len().max(1) as f64;

    if ratio <= tool_ratio {
        tracing::debug!(ratio, tool_ratio, "smart prune: tool share low, using sliding window");
        sliding_window(history, max, preserve_system);
        return;
    }

    let body_budget = max - offset.min(max);
    let mut excess = body.len().saturating_sub(body_budget);
    let protected_from = body
        .len()
        .saturating_sub(SMART_PRUNE_PROTECTED_TAIL.min(body_budget));
    let mut keep = vec![true; body.len()];
    let answers = answering_messages(body);
    let pure_calls = |m: &Message| m.carries_tool_invocations() && m.is_tool_message();

    // Pass 1: result messages. A call message goes with its last answer.
    for i in 0..protected_from {
        if excess == 0 {
            break;
        }
        let msg = &body[i];
        if !keep[i] || !(msg.role == Role::Tool || msg.carries_tool_results()) {
            continue;
        }
        keep[i] = false;
        excess -= 1;
        for (j, answered_by) in answers.iter().enumerate().take(i) {
            if keep[j]
                && pure_calls(&body[j])
                && answered_by.contains(&i)
                && answered_by.iter().all(|&a| !keep[a])
            {
                keep[j] = false;
                excess = excess.saturating_sub(1);
            }
        }
    }

    // Pass 2: call messages nobody answers any more.
    for i in 0..protected_from {
        if excess == 0 {
            break;
        }
        if keep[i] && pure_calls(&body[i]) && answers[i].iter().all(|&a| !keep[a]) {
            keep[i] = false;
            excess -= 1;
        }
    }

    let mut index = 0;
    history.retain(|_| {
        let kept = index < offset || keep[index - offset];
        index += 1;
        kept
    });

    tracing::debug!(
        ratio,
        remaining_excess = excess,
        len = history.len(),
        "smart prune: dropped tool traffic first"
    );
    sliding_window(history, max, preserve_system);
}

// ─── Orphan Repair ──────────────────────────────────────────────────────────

/// For each message, the indices of the messages holding results that
/// answer its invocations.
fn answering_messages(history: &[Message]) -> Vec<Vec<usize>> {
    let mut issuer: HashMap<&str, usize> = HashMap::new();
    let mut answers = vec![Vec::new(); history.len()];
    for (i, msg) in history.iter().enumerate() {
        for id in invocation_ids(msg) {
            issuer.insert(id, i);
        }
        for r in extract_tool_results(msg) {
            if let Some(&j) = issuer.get(r.tool_call_id) {
                if !answers[j].contains(&i) {
                    answers[j].push(i);
                }
            }
        }
    }
    answers
}

/// Restore tool-call pairing in both directions.
///
/// First removes results whose invocation is not at or before them, then
/// removes invocations that no surviving result answers. Works on every wire
/// shape through the shape-independent accessors. A message is dropped only
/// when the removal leaves it hollow. Returns the number of result and
/// invocation entries removed.
pub fn repair_orphans(history: &mut Vec<Message>) -> usize {
    let mut seen: HashSet<String> = HashSet::new();
    let mut removed_total = 0;

    history.retain_mut(|msg| {
        seen.extend(invocation_ids(msg).into_iter().map(String::from));
        let removed = msg.retain_tool_results(|id| seen.contains(id));
        if removed == 0 {
            return true;
        }
        removed_total += removed;
        tracing::debug!(role = ?msg.role, removed, "removed orphaned tool results");
        !msg.is_hollow()
    });

    let answered: HashSet<String> = history
        .iter()
        .flat_map(|m| {
            extract_tool_results(m)
                .into_iter()
                .map(|r| r.tool_call_id.to_string())
                .collect::<Vec<_>>()
        })
        .collect();

    history.retain_mut(|msg| {
        let removed = msg.retain_tool_invocations(|id| answered.contains(id));
        if removed == 0 {
            return true;
        }
        removed_total += removed;
        tracing::debug!(role = ?msg.role, removed, "removed unanswered tool calls");
        !msg.is_hollow()
    });

    removed_total
}

/// Whether every tool result answers an invocation at or before it, and
/// every invocation has a result.
pub fn pairing_holds(history: &[Message]) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<&str> = HashSet::new();
    for msg in history {
        seen.extend(invocation_ids(msg));
        for r in extract_tool_results(msg) {
            if !seen.contains(r.tool_call_id) {
                return false;
            }
            answered.insert(r.tool_call_id);
        }
    }
    seen.is_subset(&answered)
}

// ─── Aggressive Fallback ────────────────────────────────────────────────────

/// Build a much smaller history after the endpoint rejected a request as
/// too large.
///
/// Target size is `max(1, max_messages / 3)`, or `max(1, max_messages / 10)`
/// when the conversation is ultra large (more than 50 messages or 500,000
/// characters). The pinned system message, the most recent assistant
/// message that issued tool calls, and the most recent tool-result message
/// always survive; the rest of the target is filled with the newest
/// messages. In ultra mode every surviving message over 10,000 characters
/// is cut to 1,000 characters of text and results plus one marker.
pub fn aggressive_fallback(
    history: &[Message],
    max_messages: usize,
    preserve_system: bool,
) -> (Vec<Message>, FallbackReport) {
    let before = history.len();
    let total_chars = history_chars(history);
    let ultra = before > ULTRA_MESSAGE_COUNT || total_chars > ULTRA_TOTAL_CHARS;
    let target = if ultra {
        (max_messages / 10).max(1)
    } else {
        (max_messages / 3).max(1)
    };

    let mut keep = vec![false; before];
    if pinned_system(history, preserve_system) {
        keep[0] = true;
    }
    if let Some(i) = history
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.carries_tool_invocations())
    {
        keep[i] = true;
    }
    if let Some(i) = history.iter().rposition(|m| m.carries_tool_results()) {
        keep[i] = true;
    }

    let mut kept = keep.iter().filter(|k| **k).count();
    for i in (0..before).rev() {
        if kept >= target {
            break;
        }
        if !keep[i] {
            keep[i] = true;
            kept += 1;
        }
    }

    let mut reduced: Vec<Message> = history
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(m, _)| m.clone())
        .collect();
    repair_orphans(&mut reduced);

    let mut messages_shrunk = 0;
    if ultra {
        for msg in &mut reduced {
            if message_chars(msg) <= ULTRA_MESSAGE_CHARS {
                continue;
            }
            if shrink_message(msg, ULTRA_MESSAGE_TARGET) {
                messages_shrunk += 1;
            }
        }
    }

    let report = FallbackReport {
        before,
        after: reduced.len(),
        target,
        ultra,
        messages_shrunk,
    };
    tracing::warn!(
        before = report.before,
        after = report.after,
        target = report.target,
        ultra = report.ultra,
        total_chars,
        messages_shrunk,
        "applied aggressive conversation fallback"
    );
    (reduced, report)
}

/// Cut the text and result segments of `msg` so that together they hold at
/// most `budget` characters, in order. Segments past the budget are emptied;
/// the first cut segment carries the marker. Tool results keep their ids, so
/// pairing is unaffected. Returns whether the message got smaller.
fn shrink_message(msg: &mut Message, budget: usize) -> bool {
    let before = message_chars(msg);
    let marker = truncation_marker(before);
    let mut remaining = budget;
    let mut marked = false;

    let mut cut = |segment: &mut String| {
        let len = char_len(segment);
        if len <= remaining {
            remaining -= len;
            return;
        }
        let at = char_offset(segment, remaining);
        segment.truncate(at);
        remaining = 0;
        if !marked {
            segment.push_str(&marker);
            marked = true;
        }
    };
    msg.for_each_text_mut(&mut cut);
    msg.for_each_tool_result_mut(|_, content| cut(content));

    message_chars(msg) < before
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::adapters::encode_request;
    use crate::inference::types::{ModelFamily, ModelRequest, ToolInvocation, ToolResult};
    use proptest::prelude::*;

    const FAMILIES: [ModelFamily; 3] = [
        ModelFamily::Embedded,
        ModelFamily::Separate,
        ModelFamily::InlineMarker,
    ];

    const STRATEGIES: [ConversationStrategy; 3] = [
        ConversationStrategy::SlidingWindow,
        ConversationStrategy::Truncate,
        ConversationStrategy::SmartPrune,
    ];

    fn settings(max: usize, strategy: ConversationStrategy) -> TrimSettings {
        TrimSettings {
            max_messages: max,
            preserve_system: true,
            strategy,
            smart_prune_tool_ratio: 0.5,
        }
    }

    fn call(id: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: "files.read".into(),
            arguments: serde_json::json!({"id": id}),
        }
    }

    fn result(id: &str, content: &str) -> ToolResult {
        ToolResult {
            tool_call_id: id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    fn tool_round(family: ModelFamily, ids: &[&str]) -> Vec<Message> {
        let calls: Vec<ToolInvocation> = ids.iter().map(|id| call(id)).collect();
        let mut out = vec![Message::assistant_tool_calls(family, None, &calls)];
        out.extend(Message::tool_results(
            family,
            ids.iter().map(|id| result(id, "ok")).collect(),
        ));
        out
    }

    fn dialogue(n: usize) -> Vec<Message> {
        let mut h = vec![Message::system("sys")];
        for i in 0..n {
            if i % 2 == 0 {
                h.push(Message::user(format!("u{i}")));
            } else {
                h.push(Message::assistant(format!("a{i}")));
            }
        }
        h
    }

    #[test]
    fn test_sliding_window_nineteen_to_eight() {
        let original = dialogue(18);
        assert_eq!(original.len(), 19);
        let mut history = original.clone();
        let report = trim(&mut history, &settings(8, ConversationStrategy::SlidingWindow));

        assert_eq!(history.len(), 8);
        assert_eq!(report.after, 8);
        assert_eq!(history[0], original[0]);
        assert_eq!(history[6..], original[17..]);
    }

    #[test]
    fn test_within_budget_is_unchanged() {
        for strategy in STRATEGIES {
            let mut history = dialogue(5);
            let before = history.clone();
            trim(&mut history, &settings(50, strategy));
            assert_eq!(history, before);
        }
    }

    #[test]
    fn test_no_system_preservation_drops_system() {
        let mut history = dialogue(9);
        let s = TrimSettings {
            preserve_system: false,
            ..settings(4, ConversationStrategy::Truncate)
        };
        trim(&mut history, &s);
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn test_orphans_removed_when_call_trimmed_away() {
        for family in FAMILIES {
            let mut history = vec![Message::system("sys"), Message::user("go")];
            history.extend(tool_round(family, &["a", "b"]));
            history.push(Message::assistant("done"));
            // Window of 3 keeps system + the last two: the call message is cut.
            let mut trimmed = history.clone();
            let report = trim(&mut trimmed, &settings(3, ConversationStrategy::SlidingWindow));

            assert!(pairing_holds(&trimmed), "family {family}");
            assert!(report.orphans_removed >= 1);
            assert_eq!(trimmed.last().map(Message::text), Some("done".to_string()));
        }
    }

    #[test]
    fn test_repair_keeps_partially_valid_embedded_message() {
        let mut history = vec![Message::assistant_tool_calls(ModelFamily::Embedded, None, &[call("a")])];
        history.extend(Message::tool_results(
            ModelFamily::Embedded,
            vec![result("a", "1"), result("ghost", "2")],
        ));
        let removed = repair_orphans(&mut history);
        assert_eq!(removed, 1);
        assert_eq!(history.len(), 2);
        assert_eq!(extract_tool_results(&history[1]).len(), 1);
    }

    #[test]
    fn test_repair_drops_hollow_separate_message() {
        let mut history = vec![Message::user("hi")];
        history.extend(Message::tool_results(ModelFamily::Separate, vec![result("ghost", "x")]));
        assert_eq!(repair_orphans(&mut history), 1);
        assert_eq!(history, vec![Message::user("hi")]);
    }

    #[test]
    fn test_result_before_its_call_is_orphaned() {
        let mut history = Message::tool_results(ModelFamily::Separate, vec![result("late", "x")]);
        history.push(Message::assistant_tool_calls(ModelFamily::Separate, None, &[call("late")]));
        // The result goes first; the call it no longer has then goes too.
        assert_eq!(repair_orphans(&mut history), 2);
        assert!(history.is_empty());
    }

    #[test]
    fn test_repair_removes_unanswered_calls() {
        for family in FAMILIES {
            let mut history = vec![Message::user("go")];
            history.extend(tool_round(family, &["a", "b"]));
            // Lose the answer to "b" only.
            for msg in &mut history {
                msg.retain_tool_results(|id| id != "b");
            }
            history.retain(|m| !m.is_hollow());

            let removed = repair_orphans(&mut history);
            assert_eq!(removed, 1, "family {family}");
            assert!(pairing_holds(&history), "family {family}");
            let ids: Vec<String> = history
                .iter()
                .flat_map(|m| invocation_ids(m).into_iter().map(String::from).collect::<Vec<_>>())
                .collect();
            assert_eq!(ids, vec!["a".to_string()], "family {family}");
        }
    }

    #[test]
    fn test_repair_drops_call_message_left_hollow() {
        let mut history = vec![
            Message::user("go"),
            Message::assistant_tool_calls(ModelFamily::Separate, None, &[call("lost")]),
            Message::assistant("done"),
        ];
        assert_eq!(repair_orphans(&mut history), 1);
        assert_eq!(history, vec![Message::user("go"), Message::assistant("done")]);
    }

    #[test]
    fn test_pairing_rejects_unanswered_call() {
        let history = vec![Message::assistant_tool_calls(
            ModelFamily::Embedded,
            None,
            &[call("x")],
        )];
        assert!(!pairing_holds(&history));
    }

    #[test]
    fn test_smart_prune_separate_wire_keeps_every_call_answered() {
        let mut history = vec![Message::system("sys"), Message::user("start")];
        for i in 0..4 {
            let id = format!("c{i}");
            history.extend(tool_round(ModelFamily::Separate, &[id.as_str()]));
        }
        history.push(Message::user("next"));
        assert_eq!(history.len(), 11);

        trim(&mut history, &settings(10, ConversationStrategy::SmartPrune));
        assert!(history.len() <= 10);
        assert!(pairing_holds(&history));

        let request = ModelRequest {
            messages: history,
            tools: Vec::new(),
            temperature: 0.0,
            max_output_tokens: 16,
        };
        let body = encode_request(ModelFamily::Separate, "m", &request).unwrap();
        let wire = body["messages"].as_array().cloned().unwrap_or_default();
        for (i, m) in wire.iter().enumerate() {
            let Some(calls) = m["tool_calls"].as_array() else {
                continue;
            };
            for (k, c) in calls.iter().enumerate() {
                let answer = &wire[i + 1 + k];
                assert_eq!(answer["role"], "tool");
                assert_eq!(answer["tool_call_id"], c["id"]);
            }
        }
    }

    #[test]
    fn test_smart_prune_keeps_dialogue_over_tool_traffic() {
        for family in [ModelFamily::Separate, ModelFamily::Embedded] {
            let mut history = vec![Message::system("sys"), Message::user("first question")];
            for i in 0..5 {
                let id = format!("c{i}");
                history.extend(tool_round(family, &[id.as_str()]));
            }
            history.push(Message::user("second question"));
            history.push(Message::assistant("answer"));

            let mut pruned = history.clone();
            trim(&mut pruned, &settings(8, ConversationStrategy::SmartPrune));
            assert_eq!(pruned.len(), 8, "family {family}");
            assert_eq!(pruned[0].role, Role::System);
            assert!(pruned.iter().any(|m| m.text() == "first question"));
            assert!(pairing_holds(&pruned));

            // The sliding window loses the first question.
            let mut windowed = history.clone();
            trim(&mut windowed, &settings(8, ConversationStrategy::SlidingWindow));
            assert!(!windowed.iter().any(|m| m.text() == "first question"));
        }
    }

    #[test]
    fn test_smart_prune_low_tool_share_matches_sliding_window() {
        let mut a = dialogue(20);
        a.extend(tool_round(ModelFamily::Separate, &["x"]));
        let mut b = a.clone();
        trim(&mut a, &settings(6, ConversationStrategy::SmartPrune));
        trim(&mut b, &settings(6, ConversationStrategy::SlidingWindow));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fallback_standard_keeps_pinned_messages() {
        let mut history = dialogue(20);
        history.extend(tool_round(ModelFamily::Separate, &["last"]));
        history.extend(dialogue(6).into_iter().skip(1));
        // 21 + 2 + 6 = 29 messages, max 30 → target 10
        let (reduced, report) = aggressive_fallback(&history, 30, true);

        assert!(!report.ultra);
        assert_eq!(report.target, 10);
        assert_eq!(reduced.len(), 10);
        assert_eq!(reduced[0].role, Role::System);
        assert!(reduced.iter().any(|m| m.carries_tool_invocations()));
        assert!(reduced.iter().any(|m| m.carries_tool_results()));
        assert!(pairing_holds(&reduced));
    }

    #[test]
    fn test_fallback_ultra_by_count_and_shrinks_big_messages() {
        let mut history = dialogue(60);
        history.push(Message::user("x".repeat(20_000)));
        let (reduced, report) = aggressive_fallback(&history, 50, true);

        assert!(report.ultra);
        assert_eq!(report.target, 5);
        assert_eq!(reduced.len(), 5);
        assert_eq!(report.messages_shrunk, 1);
        let last = reduced.last().map(Message::text).unwrap_or_default();
        assert!(last.starts_with(&"x".repeat(1_000)));
        assert!(last.contains("[... truncated from 20000 chars total ...]"));
    }

    #[test]
    fn test_fallback_ultra_cuts_whole_message_not_each_segment() {
        let mut history = dialogue(60);
        let ids: Vec<String> = (0..20).map(|i| format!("r{i}")).collect();
        let calls: Vec<ToolInvocation> = ids.iter().map(|id| call(id)).collect();
        history.push(Message::assistant_tool_calls(ModelFamily::Embedded, None, &calls));
        history.extend(Message::tool_results(
            ModelFamily::Embedded,
            ids.iter().map(|id| result(id, &"r".repeat(900))).collect(),
        ));
        let (reduced, report) = aggressive_fallback(&history, 50, true);

        assert!(report.ultra);
        assert_eq!(report.messages_shrunk, 1);
        let results_msg = reduced
            .iter()
            .find(|m| m.carries_tool_results())
            .cloned()
            .unwrap();
        assert!(message_chars(&results_msg) <= 1_100);
        assert_eq!(extract_tool_results(&results_msg).len(), 20);
        assert!(extract_tool_results(&results_msg)[1]
            .content
            .contains("[... truncated from 18000 chars total ...]"));
        assert!(pairing_holds(&reduced));
    }

    #[test]
    fn test_fallback_ultra_counts_only_messages_that_shrank() {
        // Over the threshold in tool-call arguments alone: nothing to cut.
        let mut history = dialogue(60);
        let big = ToolInvocation {
            id: "wide".into(),
            name: "files.write".into(),
            arguments: serde_json::json!({"body": "w".repeat(12_000)}),
        };
        history.push(Message::assistant_tool_calls(ModelFamily::Separate, None, &[big]));
        history.extend(Message::tool_results(ModelFamily::Separate, vec![result("wide", "ok")]));
        let (_, report) = aggressive_fallback(&history, 50, true);

        assert!(report.ultra);
        assert_eq!(report.messages_shrunk, 0);
    }

    #[test]
    fn test_fallback_ultra_by_size() {
        let mut history = dialogue(4);
        history.push(Message::user("y".repeat(600_000)));
        let (_, report) = aggressive_fallback(&history, 30, true);
        assert!(report.ultra);
        assert_eq!(report.target, 3);
    }

    #[test]
    fn test_fallback_target_never_zero() {
        let history = dialogue(3);
        let (reduced, report) = aggressive_fallback(&history, 2, false);
        assert_eq!(report.target, 1);
        assert_eq!(reduced.len(), 1);
    }

    // ─── Properties ─────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Step {
        User,
        Assistant,
        Round(usize),
        Dangling,
        Unanswered(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::User),
            3 => Just(Step::Assistant),
            4 => (1usize..4).prop_map(Step::Round),
            1 => Just(Step::Dangling),
            1 => (1usize..3).prop_map(Step::Unanswered),
        ]
    }

    fn build(family: ModelFamily, steps: &[Step]) -> Vec<Message> {
        let mut history = vec![Message::system("sys")];
        let mut n = 0;
        for s in steps {
            match s {
                Step::User => history.push(Message::user("question")),
                Step::Assistant => history.push(Message::assistant("answer")),
                Step::Round(k) => {
                    let ids: Vec<String> = (0..*k).map(|_| { n += 1; format!("c{n}") }).collect();
                    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                    history.extend(tool_round(family, &refs));
                }
                Step::Dangling => {
                    n += 1;
                    history.extend(Message::tool_results(
                        family,
                        vec![result(&format!("ghost{n}"), "lost")],
                    ));
                }
                Step::Unanswered(k) => {
                    let calls: Vec<ToolInvocation> = (0..*k)
                        .map(|_| {
                            n += 1;
                            call(&format!("open{n}"))
                        })
                        .collect();
                    history.push(Message::assistant_tool_calls(family, None, &calls));
                }
            }
        }
        history
    }

    proptest! {
        #[test]
        fn prop_repair_pairs_both_directions(
            steps in prop::collection::vec(step(), 0..40),
            family_idx in 0usize..3,
        ) {
            let mut history = build(FAMILIES[family_idx], &steps);
            repair_orphans(&mut history);

            let mut issued: HashSet<String> = HashSet::new();
            let mut answered: HashSet<String> = HashSet::new();
            for msg in &history {
                issued.extend(invocation_ids(msg).into_iter().map(String::from));
                for r in extract_tool_results(msg) {
                    prop_assert!(issued.contains(r.tool_call_id));
                    answered.insert(r.tool_call_id.to_string());
                }
            }
            prop_assert_eq!(issued, answered);
            prop_assert!(history.iter().all(|m| !m.is_hollow()));
        }

        #[test]
        fn prop_trim_invariants(
            steps in prop::collection::vec(step(), 0..40),
            max in 2usize..20,
            family_idx in 0usize..3,
            strategy_idx in 0usize..3,
        ) {
            let history = build(FAMILIES[family_idx], &steps);
            let s = settings(max, STRATEGIES[strategy_idx]);

            let mut once = history.clone();
            trim(&mut once, &s);

            prop_assert!(pairing_holds(&once));
            prop_assert!(once.len() <= history.len());
            if history.len() > max {
                prop_assert!(once.len() <= max);
            }
            prop_assert_eq!(once[0].role, Role::System);

            let mut twice = once.clone();
            trim(&mut twice, &s);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn prop_fallback_is_small_and_paired(
            steps in prop::collection::vec(step(), 1..80),
            max in 3usize..60,
            family_idx in 0usize..3,
        ) {
            let history = build(FAMILIES[family_idx], &steps);
            let (reduced, report) = aggressive_fallback(&history, max, true);
            prop_assert!(pairing_holds(&reduced));
            prop_assert_eq!(reduced[0].role, Role::System);
            // Up to two extra pinned messages may exceed the target.
            prop_assert!(reduced.len() <= report.target.max(3));
        }
    }
}
