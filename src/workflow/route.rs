//! Route stage: a mini-model classifies the user message as in-scope (an
//! SRE/Redis operational question) or out-of-scope. Out-of-scope
//! short-circuits the rest of the pipeline and returns the original text
//! untouched.

use crate::llm::{ChatMessage, ChatRole, LlmClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    InScope,
    OutOfScope,
}

const ROUTE_PROMPT_PREFIX: &str = "Classify the following user message as either \
\"in_scope\" (a question about Redis infrastructure, performance, or operations) or \
\"out_of_scope\" (anything else, e.g. small talk). Respond with exactly one word.\n\nMessage:\n";

/// On any LLM failure this defaults to in-scope — a misclassified message
/// still gets a real attempt at an answer, whereas a wrongly-dropped one
/// silently shortchanges the user.
pub async fn route(llm: &dyn LlmClient, user_message: &str) -> RouteDecision {
    let prompt = format!("{ROUTE_PROMPT_PREFIX}{user_message}");
    let messages = [ChatMessage { role: ChatRole::User, content: prompt, tool_call_ids: vec![] }];
    match llm.chat(&messages).await {
        Ok(resp) if resp.content.trim().eq_ignore_ascii_case("out_of_scope") => RouteDecision::OutOfScope,
        _ => RouteDecision::InScope,
    }
}

#[cfg(test)]
mod route_tests {
    use super::*;
    use crate::llm::FakeLlmClient;

    #[tokio::test]
    async fn out_of_scope_response_short_circuits() {
        let llm = FakeLlmClient::new(vec!["out_of_scope"]);
        assert_eq!(route(&llm, "hello world").await, RouteDecision::OutOfScope);
    }

    #[tokio::test]
    async fn in_scope_response_proceeds() {
        let llm = FakeLlmClient::new(vec!["in_scope"]);
        assert_eq!(route(&llm, "why is memory usage climbing?").await, RouteDecision::InScope);
    }

    #[tokio::test]
    async fn llm_failure_defaults_to_in_scope() {
        let llm = FakeLlmClient::new(vec![]);
        assert_eq!(route(&llm, "anything").await, RouteDecision::InScope);
    }
}
