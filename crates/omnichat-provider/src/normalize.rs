//! Conversation normalization.
//!
//! Stored histories are irregular: a retried question leaves two user turns
//! in a row, a failed answer leaves an assistant turn without content, tool
//! results sit between turns. Most providers reject anything other than a
//! strict user/assistant alternation, so every adapter starts from
//! [`turn_chat`].

use crate::message::{ChatMessage, Role};

/// Reduce a chronological history (newest last) to a strictly alternating
/// user/assistant sequence that ends with the most recent conversational turn.
///
/// The scan runs backwards from the newest user or assistant message. A
/// message is kept only when its role is the one expected next; anything that
/// breaks the alternation is discarded, so of two consecutive user messages
/// only the later survives. System and tool messages never take part.
pub fn turn_chat(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let Some(mut expected) = messages
        .iter()
        .rev()
        .find(|m| m.role.counterpart().is_some())
        .map(|m| m.role)
    else {
        return Vec::new();
    };

    let mut kept = Vec::new();
    for message in messages.iter().rev() {
        if message.role != expected {
            continue;
        }
        kept.push(message.clone());
        if let Some(next) = expected.counterpart() {
            expected = next;
        }
    }
    kept.reverse();
    kept
}

/// Prepend a system instruction to the newest message, for providers that
/// have no system role.
pub fn prepend_instruction(messages: &mut [ChatMessage], instruction: &str) {
    if instruction.trim().is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        last.content = format!("{}\n{}", instruction, last.content);
    }
}

/// Drop a leading assistant turn, for providers that require the first turn
/// to come from the user.
pub fn drop_leading_assistant(messages: &mut Vec<ChatMessage>) {
    if messages.first().is_some_and(|m| m.role == Role::Assistant) {
        messages.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(messages: &[ChatMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(turn_chat(&[]).is_empty());
    }

    #[test]
    fn test_single_message_is_kept() {
        assert_eq!(turn_chat(&[ChatMessage::user("hi")]).len(), 1);
        assert_eq!(turn_chat(&[ChatMessage::assistant("hello")]).len(), 1);
    }

    #[test]
    fn test_already_alternating_is_unchanged() {
        let input = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        assert_eq!(turn_chat(&input), input);
    }

    #[test]
    fn test_consecutive_users_keep_later() {
        let input = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("retry"),
            ChatMessage::user("q2"),
        ];
        let out = turn_chat(&input);
        assert_eq!(contents(&out), vec!["q1", "a1", "q2"]);
    }

    #[test]
    fn test_consecutive_assistants_keep_later() {
        let input = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("partial"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        assert_eq!(contents(&turn_chat(&input)), vec!["q1", "a1", "q2"]);
    }

    #[test]
    fn test_system_and_tool_are_skipped() {
        let input = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("q1"),
            ChatMessage::tool("weather", "sunny"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
        ];
        assert_eq!(
            roles(&turn_chat(&input)),
            vec![Role::User, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn test_only_system_messages() {
        assert!(turn_chat(&[ChatMessage::system("x")]).is_empty());
    }

    #[test]
    fn test_alternation_invariant_over_generated_histories() {
        // Every history over {user, assistant} of length <= 8.
        for len in 0..=8u32 {
            for mask in 0..(1u32 << len) {
                let input: Vec<ChatMessage> = (0..len)
                    .map(|i| {
                        if mask & (1 << i) == 0 {
                            ChatMessage::user(format!("u{i}"))
                        } else {
                            ChatMessage::assistant(format!("a{i}"))
                        }
                    })
                    .collect();
                let out = turn_chat(&input);
                for pair in out.windows(2) {
                    assert_ne!(pair[0].role, pair[1].role, "input mask {mask:b}");
                }
                if let Some(last) = input.last() {
                    assert_eq!(out.last(), Some(last));
                }
            }
        }
    }

    #[test]
    fn test_prepend_instruction() {
        let mut messages = vec![ChatMessage::user("q1"), ChatMessage::user("q2")];
        prepend_instruction(&mut messages, "answer in French");
        assert_eq!(messages[0].content, "q1");
        assert_eq!(messages[1].content, "answer in French\nq2");
    }

    #[test]
    fn test_blank_instruction_is_ignored() {
        let mut messages = vec![ChatMessage::user("q")];
        prepend_instruction(&mut messages, "   ");
        assert_eq!(messages[0].content, "q");
        prepend_instruction(&mut [], "x");
    }

    #[test]
    fn test_drop_leading_assistant() {
        let mut messages = vec![ChatMessage::assistant("a0"), ChatMessage::user("q1")];
        drop_leading_assistant(&mut messages);
        assert_eq!(contents(&messages), vec!["q1"]);
        drop_leading_assistant(&mut messages);
        assert_eq!(messages.len(), 1);
    }
}
