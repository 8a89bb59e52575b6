//! Safety/fact correction pass: a bounded llm-then-tools loop that may
//! re-check claims against live tool output, followed by an edit-only
//! structured synth step that is forbidden from fabricating commands or
//! introducing unvalidated config changes.

use futures::future::BoxFuture;

use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::CorrectionResult;
use crate::workflow::sanitize::sanitize_messages_for_llm;

const SYNTH_SYSTEM_PROMPT: &str = "You are editing a drafted response for accuracy and safety. \
You may only remove or rephrase text already present; never invent a command, API call, or URL \
that was not in the draft. Never suggest CONFIG SET on a persistent/production instance. Return \
edited_response plus a list of edits_applied describing what you changed and why.";

pub struct CorrectorBudget {
    pub max_tool_rounds: u32,
}

impl Default for CorrectorBudget {
    fn default() -> Self {
        Self { max_tool_rounds: 2 }
    }
}

/// Runs the correction loop against `draft_response`. `run_tool_round` is
/// invoked once per remaining budget unit when the LLM still has unresolved
/// claims to check; it returns the tool-reply messages to append. Returns
/// the draft unedited if the LLM errors at any stage — a failed corrector
/// pass must never block delivery of an otherwise-complete response.
pub async fn correct<F>(
    llm: &dyn LlmClient,
    draft_response: &str,
    mut budget: CorrectorBudget,
    mut run_tool_round: F,
) -> CorrectionResult
where
    F: FnMut(String) -> BoxFuture<'static, Vec<ChatMessage>>,
{
    let mut transcript = vec![ChatMessage {
        role: ChatRole::User,
        content: format!("Draft response to review:\n\n{draft_response}"),
        tool_call_ids: vec![],
    }];

    while budget.max_tool_rounds > 0 {
        let sanitized = sanitize_messages_for_llm(&transcript);
        let reply = match llm.chat(&sanitized).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "corrector llm call failed, returning draft unedited");
                return unedited(draft_response);
            }
        };
        if reply.tool_call_ids.is_empty() {
            break;
        }
        let tool_messages = run_tool_round(reply.content.clone()).await;
        transcript.push(ChatMessage { role: ChatRole::Assistant, content: reply.content, tool_call_ids: reply.tool_call_ids });
        transcript.extend(tool_messages);
        budget.max_tool_rounds -= 1;
    }

    synth(llm, draft_response, &transcript).await
}

async fn synth(llm: &dyn LlmClient, draft_response: &str, transcript: &[ChatMessage]) -> CorrectionResult {
    let mut messages = vec![ChatMessage { role: ChatRole::System, content: SYNTH_SYSTEM_PROMPT.to_string(), tool_call_ids: vec![] }];
    messages.extend_from_slice(transcript);

    match llm.structured_raw(&messages, "CorrectionResult").await {
        Ok(raw) => crate::llm::parse_structured(&raw).unwrap_or_else(|_| unedited(draft_response)),
        Err(e) => {
            tracing::warn!(error = %e, "corrector synth call failed, returning draft unedited");
            unedited(draft_response)
        }
    }
}

fn unedited(draft_response: &str) -> CorrectionResult {
    CorrectionResult { edited_response: draft_response.to_string(), edits_applied: Vec::new() }
}

#[cfg(test)]
mod corrector_tests {
    use super::*;
    use crate::llm::FakeLlmClient;

    #[tokio::test]
    async fn falls_back_to_draft_when_llm_exhausted() {
        let llm = FakeLlmClient::new(vec![]);
        let result = correct(&llm, "original draft", CorrectorBudget::default(), |_: String| Box::pin(async { Vec::new() }) as BoxFuture<'static, Vec<ChatMessage>>).await;
        assert_eq!(result.edited_response, "original draft");
        assert!(result.edits_applied.is_empty());
    }

    #[tokio::test]
    async fn returns_synthesized_edit_on_success() {
        let llm = FakeLlmClient::new(vec![
            "no more tool calls needed",
            "{\"edited_response\": \"corrected draft\", \"edits_applied\": [\"removed fabricated command\"]}",
        ]);
        let result = correct(&llm, "original draft", CorrectorBudget::default(), |_: String| Box::pin(async { Vec::new() }) as BoxFuture<'static, Vec<ChatMessage>>).await;
        assert_eq!(result.edited_response, "corrected draft");
        assert_eq!(result.edits_applied, vec!["removed fabricated command".to_string()]);
    }
}
