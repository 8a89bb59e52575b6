//! Plan stage: the bounded llm⇄tools loop that gathers evidence before
//! diagnosis. Tool calls are executed up to a small iteration budget, each
//! execution appending both a tool-role message to the working history and
//! a `ResultEnvelope` to the signal set the diagnose stage will summarize.

use futures::future::BoxFuture;

use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::ResultEnvelope;
use crate::workflow::sanitize::sanitize_messages_for_llm;

pub struct PlanOutcome {
    pub transcript: Vec<ChatMessage>,
    pub signals_envelopes: Vec<ResultEnvelope>,
}

/// `execute_tool_call` runs one tool call (named by the LLM's reply content,
/// since `ChatResponse` doesn't carry parsed call args at this layer) and
/// returns the resulting tool-role message plus its envelope. Returning
/// `None` means "no tool was actually requested", ending the loop. Async
/// because a real adapter invocation goes back over Redis.
pub async fn plan<F>(
    llm: &dyn LlmClient,
    system_prompt: &str,
    history: Vec<ChatMessage>,
    max_iterations: u32,
    mut execute_tool_call: F,
) -> PlanOutcome
where
    F: FnMut(String, Vec<String>) -> BoxFuture<'static, Option<(ChatMessage, ResultEnvelope)>>,
{
    let mut transcript = vec![ChatMessage { role: ChatRole::System, content: system_prompt.to_string(), tool_call_ids: vec![] }];
    transcript.extend(history);

    let mut signals_envelopes = Vec::new();
    let mut remaining = max_iterations;

    while remaining > 0 {
        let sanitized = sanitize_messages_for_llm(&transcript);
        let reply = match llm.chat(&sanitized).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "plan llm call failed, stopping iteration");
                break;
            }
        };

        if reply.tool_call_ids.is_empty() {
            transcript.push(ChatMessage { role: ChatRole::Assistant, content: reply.content, tool_call_ids: vec![] });
            break;
        }

        let tool_name = reply.content.clone();
        let tool_call_ids = reply.tool_call_ids.clone();
        let Some((tool_message, envelope)) = execute_tool_call(tool_name, tool_call_ids).await else {
            transcript.push(ChatMessage { role: ChatRole::Assistant, content: reply.content, tool_call_ids: vec![] });
            break;
        };

        transcript.push(ChatMessage { role: ChatRole::Assistant, content: reply.content, tool_call_ids: reply.tool_call_ids });
        transcript.push(tool_message);
        signals_envelopes.push(envelope);
        remaining -= 1;
    }

    PlanOutcome { transcript, signals_envelopes }
}

#[cfg(test)]
mod plan_tests {
    use super::*;
    use crate::llm::FakeLlmClient;
    use crate::models::ToolStatus;

    #[tokio::test]
    async fn stops_when_no_tool_is_requested() {
        let llm = FakeLlmClient::new(vec!["final answer, no tools needed"]);
        let outcome = plan(&llm, "system prompt", vec![], 3, |_, _| Box::pin(async { None })).await;
        assert!(outcome.signals_envelopes.is_empty());
        assert!(outcome.transcript.iter().any(|m| m.content.contains("final answer")));
    }

    #[tokio::test]
    async fn a_reply_with_no_declared_tool_calls_never_invokes_the_executor() {
        // FakeLlmClient never populates tool_call_ids, mirroring a plain
        // chat completion with no function-calling support wired up.
        let llm = FakeLlmClient::new(vec!["call tool"]);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let outcome = plan(&llm, "system", vec![], 3, move |_, _ids| {
            calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async {
                Some((
                    ChatMessage { role: crate::llm::ChatRole::User, content: "tool result".into(), tool_call_ids: vec!["call-1".into()] },
                    crate::tools::build_envelope("t", "t", serde_json::Map::new(), ToolStatus::Success, serde_json::json!({})),
                ))
            })
        })
        .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(outcome.signals_envelopes.is_empty());
    }
}
