//! Tiered truncation of tool-result payloads.
//!
//! Tool results are split into two classes by position:
//!
//! - the **trailing group**: the run of result-bearing messages at the very
//!   end of history. These answer the round in progress and get the large
//!   new-response budget: once the group is over the threshold, each entry
//!   is cut to an even share of the threshold, never more than the target.
//! - **history**: every other result. Each entry over the history threshold
//!   is cut to the history target.
//!
//! A trailing group holding a single result entry is never truncated.
//!
//! Only payload text changes. Message count and order are preserved, and
//! every cut leaves a `[... truncated from N chars total ...]` marker.

use crate::inference::types::{extract_tool_results, Message};

use super::tokens::{char_len, truncate_in_place};
use super::types::TruncationBudgets;

/// What a truncation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncationReport {
    pub history_entries_cut: usize,
    pub trailing_entries_cut: usize,
    /// Characters removed, marker overhead not subtracted.
    pub chars_removed: usize,
}

impl TruncationReport {
    pub fn entries_cut(&self) -> usize {
        self.history_entries_cut + self.trailing_entries_cut
    }
}

/// Index of the first message of the trailing group (`history.len()` when
/// the last message carries no results).
pub fn trailing_group_start(history: &[Message]) -> usize {
    let mut start = history.len();
    while start > 0 && history[start - 1].carries_tool_results() {
        start -= 1;
    }
    start
}

/// Shrink oversized tool-result payloads in place.
pub fn truncate_tool_messages(
    history: &mut [Message],
    budgets: &TruncationBudgets,
) -> TruncationReport {
    let mut report = TruncationReport::default();
    let group_start = trailing_group_start(history);

    // History class
    for (index, msg) in history[..group_start].iter_mut().enumerate() {
        if !msg.carries_tool_results() {
            continue;
        }
        msg.for_each_tool_result_mut(|id, content| {
            let size = char_len(content);
            if size > budgets.history.threshold {
                truncate_in_place(content, budgets.history.target);
                report.history_entries_cut += 1;
                report.chars_removed += size.saturating_sub(char_len(content));
                tracing::info!(
                    message_index = index,
                    tool_call_id = %id,
                    original_chars = size,
                    target = budgets.history.target,
                    "truncated history tool result"
                );
            }
        });
    }

    // Trailing group
    let group = &mut history[group_start..];
    let sizes: Vec<usize> = group
        .iter()
        .flat_map(|m| {
            extract_tool_results(m)
                .into_iter()
                .map(|r| char_len(r.content))
                .collect::<Vec<_>>()
        })
        .collect();
    let entries = sizes.len();
    let combined: usize = sizes.iter().sum();

    if entries <= 1 {
        if entries == 1 {
            tracing::debug!(chars = combined, "sole trailing tool result exempt from truncation");
        }
        return report;
    }
    if combined <= budgets.new_response.threshold {
        return report;
    }

    let share = (budgets.new_response.threshold / entries).min(budgets.new_response.target);
    for (offset, msg) in group.iter_mut().enumerate() {
        msg.for_each_tool_result_mut(|id, content| {
            let size = char_len(content);
            if size > share {
                truncate_in_place(content, share);
                report.trailing_entries_cut += 1;
                report.chars_removed += size.saturating_sub(char_len(content));
                tracing::info!(
                    message_index = group_start + offset,
                    tool_call_id = %id,
                    original_chars = size,
                    share,
                    group_entries = entries,
                    "truncated trailing tool result"
                );
            }
        });
    }

    report
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::tokens::truncation_marker;
    use crate::agent_core::types::Budget;
    use crate::inference::types::{ModelFamily, ToolInvocation, ToolResult};
    use proptest::prelude::*;

    const FAMILIES: [ModelFamily; 3] = [
        ModelFamily::Embedded,
        ModelFamily::Separate,
        ModelFamily::InlineMarker,
    ];

    fn call(id: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: "search".into(),
            arguments: serde_json::json!({}),
        }
    }

    fn result(id: &str, size: usize) -> ToolResult {
        ToolResult {
            tool_call_id: id.into(),
            content: "r".repeat(size),
            is_error: false,
        }
    }

    /// user, assistant(call ids), results(ids with sizes)
    fn round(family: ModelFamily, items: &[(&str, usize)]) -> Vec<Message> {
        let calls: Vec<ToolInvocation> = items.iter().map(|(id, _)| call(id)).collect();
        let mut out = vec![Message::assistant_tool_calls(family, None, &calls)];
        out.extend(Message::tool_results(
            family,
            items.iter().map(|(id, size)| result(id, *size)).collect(),
        ));
        out
    }

    fn sizes(history: &[Message]) -> Vec<usize> {
        history
            .iter()
            .flat_map(|m| extract_tool_results(m).into_iter().map(|r| char_len(r.content)))
            .collect()
    }

    #[test]
    fn test_sole_trailing_result_is_exempt() {
        for family in FAMILIES {
            let mut history = vec![Message::user("go")];
            history.extend(round(family, &[("a", 700_000)]));
            let report = truncate_tool_messages(&mut history, &TruncationBudgets::default());
            assert_eq!(report.entries_cut(), 0);
            assert_eq!(sizes(&history), vec![700_000], "family {family}");
        }
    }

    #[test]
    fn test_same_result_as_history_entry_is_cut() {
        for family in FAMILIES {
            let mut history = vec![Message::user("go")];
            history.extend(round(family, &[("a", 700_000)]));
            history.push(Message::assistant("done"));
            history.push(Message::user("next"));

            let budgets = TruncationBudgets {
                history: Budget::new(50_000, 25_000),
                ..TruncationBudgets::default()
            };
            let report = truncate_tool_messages(&mut history, &budgets);
            assert_eq!(report.history_entries_cut, 1);
            let after = sizes(&history)[0];
            assert!(after <= 50_000 + char_len(&truncation_marker(700_000)));
            assert_eq!(after, 25_000 + char_len(&truncation_marker(700_000)));
        }
    }

    #[test]
    fn test_two_trailing_results_share_budget() {
        for family in FAMILIES {
            let budgets = TruncationBudgets::default();
            let half = budgets.new_response.threshold / 2;

            let mut small = round(family, &[("a", half - 1), ("b", half - 1)]);
            truncate_tool_messages(&mut small, &budgets);
            assert_eq!(sizes(&small), vec![half - 1, half - 1]);

            let mut big = round(family, &[("a", half + 10_000), ("b", half + 20_000)]);
            let report = truncate_tool_messages(&mut big, &budgets);
            assert_eq!(report.trailing_entries_cut, 2, "family {family}");
            for r in big.iter().flat_map(extract_tool_results) {
                let body = r.content.split("\n\n[...").next().unwrap();
                assert_eq!(char_len(body), half);
            }
        }
    }

    #[test]
    fn test_only_oversized_trailing_entries_cut() {
        let budgets = TruncationBudgets {
            history: Budget::new(50, 25),
            new_response: Budget::new(300, 200),
        };
        let mut history = round(ModelFamily::Separate, &[("a", 50), ("b", 400)]);
        truncate_tool_messages(&mut history, &budgets);
        let after = sizes(&history);
        assert_eq!(after[0], 50, "below its share of 150");
        assert!(after[1] < 400);
    }

    #[test]
    fn test_trailing_share_capped_by_target() {
        for family in FAMILIES {
            let budgets = TruncationBudgets {
                history: Budget::new(50, 25),
                new_response: Budget::new(400, 100),
            };
            let mut history = round(family, &[("a", 300), ("b", 300)]);
            let report = truncate_tool_messages(&mut history, &budgets);
            assert_eq!(report.trailing_entries_cut, 2, "family {family}");
            for r in history.iter().flat_map(extract_tool_results) {
                let body = r.content.split("\n\n[...").next().unwrap();
                assert_eq!(char_len(body), 100, "family {family}");
            }
        }
    }

    #[test]
    fn test_small_history_results_untouched() {
        let mut history = round(ModelFamily::Embedded, &[("a", 10)]);
        history.push(Message::assistant("ok"));
        let report = truncate_tool_messages(&mut history, &TruncationBudgets::default());
        assert_eq!(report, TruncationReport::default());
    }

    #[test]
    fn test_trailing_group_start() {
        let mut history = vec![Message::user("go")];
        history.extend(round(ModelFamily::Separate, &[("a", 1), ("b", 1)]));
        assert_eq!(trailing_group_start(&history), 2);
        history.push(Message::assistant("done"));
        assert_eq!(trailing_group_start(&history), history.len());
    }

    proptest! {
        #[test]
        fn prop_truncation_monotone(
            rounds in prop::collection::vec(prop::collection::vec(0usize..600, 1..4), 1..5),
            family_idx in 0usize..3,
            tail_dialogue in any::<bool>(),
        ) {
            let family = FAMILIES[family_idx];
            let budgets = TruncationBudgets {
                history: Budget::new(200, 100),
                new_response: Budget::new(500, 400),
            };
            let mut history = vec![Message::user("start")];
            let mut n = 0;
            for round_sizes in &rounds {
                let ids: Vec<String> = round_sizes.iter().map(|_| { n += 1; format!("c{n}") }).collect();
                let items: Vec<(&str, usize)> = ids.iter().map(String::as_str).zip(round_sizes.iter().copied()).collect();
                history.extend(round(family, &items));
            }
            if tail_dialogue {
                history.push(Message::assistant("summary"));
            }

            let before = sizes(&history);
            let count = history.len();
            let group_start = trailing_group_start(&history);
            let trailing_entries: usize = history[group_start..].iter().map(|m| extract_tool_results(m).len()).sum();
            truncate_tool_messages(&mut history, &budgets);
            let after = sizes(&history);

            prop_assert_eq!(history.len(), count);
            let history_entries = before.len() - trailing_entries;
            for (i, (b, a)) in before.iter().zip(after.iter()).enumerate() {
                prop_assert!(a <= b);
                let threshold = if i < history_entries { budgets.history.threshold } else { budgets.new_response.threshold };
                if *b <= threshold / trailing_entries.max(1) || (i < history_entries && *b <= threshold) {
                    prop_assert_eq!(a, b);
                }
                if i < history_entries && *b > threshold {
                    prop_assert!(*a <= budgets.history.target + char_len(&truncation_marker(*b)));
                }
            }
            if trailing_entries == 1 {
                prop_assert_eq!(before.last(), after.last());
            }
        }
    }
}
