//! Bounded prompt construction for the decision call
//!
//! The system instruction always goes first. History is taken newest-first
//! until the character budget runs out, then restored to chronological order.
//! A single newest message that alone exceeds the budget is kept, trimmed to
//! its most recent characters, so the model always sees the latest turn.

use crate::llm::ChatMessage;

use super::state::ActionState;

/// Characters of history offered to the decision model by default
pub const DEFAULT_HISTORY_BUDGET: usize = 5_000;

/// Serialized size of one message, in characters
fn message_cost(message: &ChatMessage) -> usize {
    message.role.as_str().len() + message.content.chars().count()
}

/// Keep the last `max_chars` characters of `content`
fn tail_chars(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    content.chars().skip(total - max_chars).collect()
}

/// Window arbitrary history under `budget` characters
pub fn window_history(history: &[ChatMessage], budget: usize) -> Vec<ChatMessage> {
    let mut used = 0usize;
    let mut kept = Vec::new();

    for message in history.iter().rev() {
        let cost = message_cost(message);
        if used + cost <= budget {
            used += cost;
            kept.push(message.clone());
            continue;
        }

        if kept.is_empty() {
            let room = budget.saturating_sub(message.role.as_str().len());
            if room > 0 {
                kept.push(ChatMessage {
                    role: message.role,
                    content: tail_chars(&message.content, room),
                });
            }
        }
        break;
    }

    kept.reverse();
    kept
}

/// System instruction plus as much recent history as fits `budget`
pub fn format_messages(system_prompt: &str, state: &ActionState, budget: usize) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(window_history(&state.messages, budget));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn total_cost(messages: &[ChatMessage]) -> usize {
        messages.iter().map(message_cost).sum()
    }

    #[test]
    fn test_system_prompt_first() {
        let state = ActionState::new_query(vec![], "hello");
        let messages = format_messages("decide", &state, DEFAULT_HISTORY_BUDGET);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("decide"));
        assert_eq!(messages[1], ChatMessage::user("hello"));
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| ChatMessage::user(format!("{:0>96}", i)))
            .collect();
        // each message costs 4 + 96 = 100 chars
        let windowed = window_history(&history, 350);
        assert_eq!(windowed.len(), 3);
        assert!(windowed[0].content.ends_with('7'));
        assert!(windowed[2].content.ends_with('9'));
        assert!(total_cost(&windowed) <= 350);
    }

    #[test]
    fn test_oversized_latest_message_is_trimmed() {
        let long = "x".repeat(100) + "END";
        let history = vec![ChatMessage::user("old"), ChatMessage::assistant(long)];
        let windowed = window_history(&history, 50);

        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].role, Role::Assistant);
        assert!(windowed[0].content.ends_with("END"));
        assert_eq!(total_cost(&windowed), 50);
    }

    #[test]
    fn test_multibyte_truncation_is_safe() {
        let history = vec![ChatMessage::user("日本語のテキスト".repeat(20))];
        let windowed = window_history(&history, 14);
        assert_eq!(windowed[0].content.chars().count(), 10);
    }

    #[test]
    fn test_empty_history() {
        assert!(window_history(&[], 100).is_empty());
        let history = vec![ChatMessage::user("hi")];
        assert!(window_history(&history, 0).is_empty());
    }
}
