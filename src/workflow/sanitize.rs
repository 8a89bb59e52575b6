//! Message sanitizer: an LLM provider rejects a tool-role message unless it
//! answers a tool_call id the immediately-preceding assistant message
//! declared, and rejects a conversation that opens with a tool-role
//! message. This strips both.

use crate::llm::{ChatMessage, ChatRole};

pub fn sanitize_messages_for_llm(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut declared_ids = std::collections::HashSet::new();
    for m in messages {
        if m.role == ChatRole::Assistant {
            for id in &m.tool_call_ids {
                declared_ids.insert(id.clone());
            }
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    let mut started = false;
    for m in messages {
        let is_tool_reply = !m.tool_call_ids.is_empty() && m.role != ChatRole::Assistant;
        if !started {
            if is_tool_reply {
                continue; // leading tool message, drop
            }
            started = true;
        }
        if is_tool_reply && !m.tool_call_ids.iter().any(|id| declared_ids.contains(id)) {
            continue; // orphaned tool reply, no matching assistant tool_call
        }
        out.push(m.clone());
    }
    out
}

#[cfg(test)]
mod sanitize_tests {
    use super::*;

    fn msg(role: ChatRole, content: &str, tool_call_ids: Vec<&str>) -> ChatMessage {
        ChatMessage { role, content: content.to_string(), tool_call_ids: tool_call_ids.into_iter().map(String::from).collect() }
    }

    #[test]
    fn drops_leading_tool_message() {
        let messages = vec![
            msg(ChatRole::User, "orphan tool reply", vec!["call-1"]),
            msg(ChatRole::User, "hello", vec![]),
        ];
        let out = sanitize_messages_for_llm(&messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "hello");
    }

    #[test]
    fn keeps_tool_reply_matching_a_declared_call() {
        let messages = vec![
            msg(ChatRole::User, "ping memory", vec![]),
            msg(ChatRole::Assistant, "", vec!["call-1"]),
            msg(ChatRole::User, "42mb used", vec!["call-1"]),
        ];
        let out = sanitize_messages_for_llm(&messages);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn drops_tool_reply_with_unmatched_call_id() {
        let messages = vec![
            msg(ChatRole::User, "ping memory", vec![]),
            msg(ChatRole::Assistant, "", vec!["call-1"]),
            msg(ChatRole::User, "stale reply", vec!["call-2"]),
        ];
        let out = sanitize_messages_for_llm(&messages);
        assert_eq!(out.len(), 2);
        assert!(!out.iter().any(|m| m.content == "stale reply"));
    }
}
