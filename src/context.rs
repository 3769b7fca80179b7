//! Context window management: token estimation and history truncation.
//!
//! These are opt-in helpers consulted by the AI Integration Bridge before it
//! builds the last-K-message window (component O, §4.11 step 2). Nothing
//! here runs automatically outside the bridge.

use crate::types::{Message, MessageRole};

/// Estimate token count for a message list.
///
/// Uses a character-based approximation (1 token ~= 4 characters). This is a
/// conservative estimate that works across model families without needing a
/// model-specific tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;
    for message in messages {
        total_chars += 8; // role formatting overhead
        total_chars += message.content.len();
    }
    total_chars += 16; // conversation-level overhead

    (total_chars + 3) / 4
}

/// Truncate message history, keeping the most recent messages.
///
/// Always preserves a leading system prompt message (if `preserve_system` is
/// set and the first message has role `System`) and keeps the most recent
/// `keep` messages after it. Does not attempt to preserve any other
/// structural relationship between messages.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    if messages.len() <= keep {
        return messages.to_vec();
    }

    let has_system = preserve_system && messages[0].role == MessageRole::System;

    if has_system {
        let mut result = vec![messages[0].clone()];
        if keep > 0 && messages.len() > 1 {
            let start = messages.len().saturating_sub(keep);
            result.extend_from_slice(&messages[start.max(1)..]);
        }
        result
    } else if keep > 0 {
        let start = messages.len().saturating_sub(keep);
        messages[start..].to_vec()
    } else {
        Vec::new()
    }
}

/// Check whether history is approaching a model's context window.
///
/// Returns `true` once the estimated token count exceeds `limit * margin`.
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationId, UserId};

    fn user_msg(content: &str) -> Message {
        Message::user(ConversationId("c1".into()), UserId("u1".into()), content)
    }

    #[test]
    fn estimate_tokens_empty_history_is_zero() {
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn estimate_tokens_grows_with_content() {
        let short = vec![user_msg("hi")];
        let long = vec![user_msg(&"x".repeat(1000))];
        assert!(estimate_tokens(&long) > estimate_tokens(&short));
    }

    #[test]
    fn truncate_keeps_all_when_under_budget() {
        let messages = vec![user_msg("a"), user_msg("b")];
        assert_eq!(truncate_messages(&messages, 10, true).len(), 2);
    }

    #[test]
    fn truncate_preserves_leading_system_message() {
        let messages = vec![
            Message::system(ConversationId("c1".into()), "be helpful"),
            user_msg("1"),
            user_msg("2"),
            user_msg("3"),
            user_msg("4"),
        ];
        let truncated = truncate_messages(&messages, 2, true);
        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated[0].role, MessageRole::System);
        assert_eq!(truncated[1].content, "3");
        assert_eq!(truncated[2].content, "4");
    }

    #[test]
    fn truncate_without_preserve_drops_system_message() {
        let messages = vec![
            Message::system(ConversationId("c1".into()), "be helpful"),
            user_msg("1"),
            user_msg("2"),
            user_msg("3"),
        ];
        let truncated = truncate_messages(&messages, 2, false);
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].role, MessageRole::User);
    }

    #[test]
    fn approaching_limit_detects_large_history() {
        let messages = vec![user_msg(&"x".repeat(1000))];
        assert!(!is_approaching_limit(&messages, 1000, 0.9));
        assert!(is_approaching_limit(&messages, 200, 0.9));
    }
}
