//! Agent workflow engine: `Route → Plan → Diagnose → {Recommendation
//! workers} → Reduce → Correct → Synth`, implemented as explicit async
//! control flow rather than a graph-execution crate (see DESIGN.md for why).

pub mod corrector;
pub mod diagnose;
pub mod plan;
pub mod reduce;
pub mod route;
pub mod sanitize;
pub mod retry;
pub mod synth;
pub mod worker;

use futures::future::{join_all, BoxFuture};
use tracing::Instrument;

use crate::llm::{ChatMessage, LlmClient};
use crate::models::{Citation, ResultEnvelope};
use crate::workflow::corrector::CorrectorBudget;
use crate::workflow::route::RouteDecision;

pub const DEFAULT_PLAN_ITERATIONS: u32 = 4;
const RECOMMENDATION_SYSTEM_PROMPT: &str = "You are an SRE assistant for Redis infrastructure. \
Use only the evidence gathered so far; never fabricate metrics or command output.";

/// Whether a drafted response contains anything worth the corrector pass's
/// cost: a suggested `CONFIG SET`, a raw `rladmin` invocation, or a URL the
/// reader would otherwise take on faith. Absent these, the draft stands.
fn needs_correction(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("config set") || lower.contains("rladmin") || message.contains("http://") || message.contains("https://")
}

pub struct WorkflowOutcome {
    pub final_message: String,
    pub citations: Vec<Citation>,
    pub signals_envelopes: Vec<ResultEnvelope>,
    pub corrector_applied: bool,
}

/// Runs the full pipeline for one user turn. `execute_tool_call` bridges
/// into the caller's tool manager (so this module stays storage-agnostic);
/// `knowledge_lookup` resolves per-topic documentation context.
pub async fn run_turn<T, K>(
    llm: &dyn LlmClient,
    user_message: &str,
    history: Vec<ChatMessage>,
    mut execute_tool_call: T,
    mut knowledge_lookup: K,
) -> WorkflowOutcome
where
    T: FnMut(String, Vec<String>) -> BoxFuture<'static, Option<(ChatMessage, ResultEnvelope)>>,
    K: FnMut(&str) -> String,
{
    if route::route(llm, user_message)
        .instrument(tracing::info_span!("workflow", graph = "sre_turn", node = "route"))
        .await
        == RouteDecision::OutOfScope
    {
        return WorkflowOutcome {
            final_message: user_message.to_string(),
            citations: Vec::new(),
            signals_envelopes: Vec::new(),
            corrector_applied: false,
        };
    }

    let plan_outcome = plan::plan(llm, RECOMMENDATION_SYSTEM_PROMPT, history, DEFAULT_PLAN_ITERATIONS, &mut execute_tool_call)
        .instrument(tracing::info_span!("workflow", graph = "sre_turn", node = "plan"))
        .await;

    let signals_summary = plan_outcome
        .signals_envelopes
        .iter()
        .map(|e| format!("{}: {}", e.name, e.data))
        .collect::<Vec<_>>()
        .join("\n");
    let topics = diagnose::diagnose(llm, &signals_summary)
        .instrument(tracing::info_span!("workflow", graph = "sre_turn", node = "diagnose"))
        .await;

    if topics.is_empty() {
        return WorkflowOutcome {
            final_message: "No actionable issues were identified from the available signals.".to_string(),
            citations: Vec::new(),
            signals_envelopes: plan_outcome.signals_envelopes,
            corrector_applied: false,
        };
    }

    let recommendations = join_all(topics.iter().map(|topic| {
        let knowledge_context = knowledge_lookup(&topic.id);
        let span = tracing::info_span!("workflow", graph = "sre_turn", node = "recommend", topic_id = %topic.id);
        async move { Some(worker::recommend_for_topic(llm, topic, &knowledge_context).await) }.instrument(span)
    }))
    .await;

    let reduced = {
        let _span = tracing::info_span!("workflow", graph = "sre_turn", node = "reduce").entered();
        reduce::reduce_plans(topics, recommendations)
    };
    let synthesized = {
        let _span = tracing::info_span!("workflow", graph = "sre_turn", node = "synth").entered();
        synth::synthesize(&reduced.per_topic)
    };

    if !needs_correction(&synthesized.message) {
        return WorkflowOutcome {
            final_message: synthesized.message,
            citations: synthesized.citations,
            signals_envelopes: plan_outcome.signals_envelopes,
            corrector_applied: false,
        };
    }

    let corrected = corrector::correct(llm, &synthesized.message, CorrectorBudget::default(), |_: String| {
        Box::pin(async { Vec::new() }) as BoxFuture<'static, Vec<ChatMessage>>
    })
    .instrument(tracing::info_span!("workflow", graph = "sre_turn", node = "correct"))
    .await;
    let corrector_applied = !corrected.edits_applied.is_empty();

    WorkflowOutcome {
        final_message: corrected.edited_response,
        citations: synthesized.citations,
        signals_envelopes: plan_outcome.signals_envelopes,
        corrector_applied,
    }
}

#[cfg(test)]
mod workflow_tests {
    use super::*;
    use crate::llm::FakeLlmClient;

    #[test]
    fn needs_correction_is_case_insensitive_on_config_set_and_catches_rladmin_and_urls() {
        assert!(needs_correction("run config set maxmemory 100mb"));
        assert!(needs_correction("use rladmin status"));
        assert!(needs_correction("see https://example.com/docs"));
        assert!(!needs_correction("memory usage looks healthy"));
    }

    #[tokio::test]
    async fn out_of_scope_short_circuits_with_original_text() {
        let llm = FakeLlmClient::new(vec!["out_of_scope"]);
        let outcome = run_turn(&llm, "hello world", vec![], |_, _| Box::pin(async { None }), |_| String::new()).await;
        assert_eq!(outcome.final_message, "hello world");
        assert!(!outcome.corrector_applied);
        assert!(outcome.citations.is_empty());
    }

    #[tokio::test]
    async fn no_diagnosed_topics_yields_a_neutral_message() {
        let llm = FakeLlmClient::new(vec![
            "in_scope",
            "no tools needed",      // plan stage's single chat call
            "[]",                   // diagnose returns no problems
        ]);
        let outcome = run_turn(&llm, "why is latency high?", vec![], |_, _| Box::pin(async { None }), |_| String::new()).await;
        assert!(outcome.final_message.contains("No actionable issues"));
    }
}
