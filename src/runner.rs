//! Task runner: leases a task, resolves the target instance, drives the
//! workflow engine, and writes the terminal result/error. A hand-rolled
//! lease → work → emit-milestones loop rather than a task-queue framework.

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;

use crate::emitter::ProgressEmitter;
use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::TaskStatus;
use crate::qa::QaRecorder;
use crate::task_store::TaskStore;
use crate::thread_store::ThreadStore;
use crate::tools::ToolManager;
use crate::workflow;

pub struct RunnerDeps {
    pub llm: Arc<dyn LlmClient>,
    pub threads: Arc<ThreadStore>,
    pub tasks: Arc<TaskStore>,
    pub tools: Arc<ToolManager>,
    pub qa: Arc<QaRecorder>,
}

/// Resolves which Redis instance a turn targets. Precedence: explicit
/// client argument, then the thread's saved context, then whatever the
/// extractor found in the message body. `None` means the router/
/// knowledge-only branch is taken.
pub fn resolve_instance_id(
    explicit: Option<&str>,
    thread_context_instance_id: Option<&str>,
    extracted_from_message: Option<&str>,
) -> Option<String> {
    explicit
        .or(thread_context_instance_id)
        .or(extracted_from_message)
        .map(String::from)
}

pub async fn run_task(
    deps: &RunnerDeps,
    emitter: Arc<dyn ProgressEmitter>,
    thread_id: &str,
    task_id: &str,
    user_message: &str,
    explicit_instance_id: Option<&str>,
) -> Result<()> {
    deps.tasks.update_status(task_id, TaskStatus::InProgress).await?;
    emitter.emit("agent_start", "Starting analysis").await;

    let thread = deps.threads.get(thread_id).await?;
    let thread_context_instance_id =
        thread.as_ref().and_then(|t| t.context.get("instance_id")).and_then(|v| v.as_str()).map(String::from);
    let extracted = extract_instance_id_from_message(user_message);

    let instance_id = resolve_instance_id(explicit_instance_id, thread_context_instance_id.as_deref(), extracted.as_deref());

    if let Some(ref iid) = instance_id {
        emitter.emit("instance_context", &format!("Using instance {iid}")).await;
        let mut updates = std::collections::HashMap::new();
        updates.insert("instance_id".to_string(), serde_json::Value::String(iid.clone()));
        deps.threads.update_context(thread_id, updates, true).await?;
    }

    let history: Vec<ChatMessage> = thread
        .map(|t| {
            t.messages
                .iter()
                .map(|m| ChatMessage {
                    role: match &m.role {
                        crate::models::Role::User => ChatRole::User,
                        crate::models::Role::Assistant => ChatRole::Assistant,
                        crate::models::Role::System => ChatRole::System,
                    },
                    content: m.content.clone(),
                    tool_call_ids: vec![],
                })
                .collect()
        })
        .unwrap_or_default();

    let llm = deps.llm.as_ref();
    let tools = Arc::clone(&deps.tools);
    let scope = instance_id.clone().unwrap_or_else(|| crate::tools::ALL_INSTANCES_SCOPE.to_string());

    let outcome = workflow::run_turn(
        llm,
        user_message,
        history,
        move |tool_name, tool_call_ids| {
            let tools = Arc::clone(&tools);
            let scope = scope.clone();
            Box::pin(async move {
                let envelope = tools.execute(&scope, &tool_name, serde_json::Map::new()).await;
                let message = ChatMessage {
                    role: ChatRole::User,
                    content: envelope.data.to_string(),
                    tool_call_ids,
                };
                Some((message, envelope))
            }) as BoxFuture<'static, Option<(ChatMessage, crate::models::ResultEnvelope)>>
        },
        |_topic_id| String::new(),
    )
    .await;

    match run_outcome_to_result(&outcome) {
        Ok(result_json) => {
            deps.tasks.set_result(task_id, &result_json).await?;
            deps.threads
                .append_messages(
                    thread_id,
                    vec![serde_json::json!({"role": "assistant", "content": outcome.final_message})],
                )
                .await?;
            if !outcome.citations.is_empty() || !outcome.final_message.is_empty() {
                let qa_id = deps
                    .qa
                    .record(user_message, &outcome.final_message, outcome.citations, None, Some(thread_id), Some(task_id))
                    .await?;
                let qa = Arc::clone(&deps.qa);
                let llm = Arc::clone(&deps.llm);
                tokio::spawn(async move {
                    if let Err(e) = qa.embed_qa_record(llm.as_ref(), &qa_id).await {
                        tracing::warn!(qa_id, error = %e, "qa embedding job failed");
                    }
                });
            }
            emitter.emit("agent_complete", "Analysis complete").await;
        }
        Err(e) => {
            deps.tasks.set_error(task_id, &e.to_string()).await?;
            emitter.emit("agent_error", &e.to_string()).await;
        }
    }

    Ok(())
}

fn run_outcome_to_result(outcome: &workflow::WorkflowOutcome) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "message": outcome.final_message,
        "citations": outcome.citations,
        "corrector_applied": outcome.corrector_applied,
    }))
}

/// Minimal instance-id extractor: looks for a `redis://` or `rediss://`
/// connection string in the free-text message. Full NLP-based extraction is
/// out of scope here; this covers the common "here's my connection string"
/// case.
fn extract_instance_id_from_message(message: &str) -> Option<String> {
    message
        .split_whitespace()
        .find(|token| token.starts_with("redis://") || token.starts_with("rediss://"))
        .map(String::from)
}

#[cfg(test)]
mod runner_tests {
    use super::*;

    #[test]
    fn explicit_instance_id_wins_over_thread_and_extracted() {
        let resolved = resolve_instance_id(Some("explicit"), Some("from-thread"), Some("from-message"));
        assert_eq!(resolved.as_deref(), Some("explicit"));
    }

    #[test]
    fn thread_context_wins_when_no_explicit_id() {
        let resolved = resolve_instance_id(None, Some("from-thread"), Some("from-message"));
        assert_eq!(resolved.as_deref(), Some("from-thread"));
    }

    #[test]
    fn extracted_only_used_when_nothing_else_present() {
        let resolved = resolve_instance_id(None, None, Some("from-message"));
        assert_eq!(resolved.as_deref(), Some("from-message"));
    }

    #[test]
    fn no_instance_found_anywhere_yields_none() {
        assert_eq!(resolve_instance_id(None, None, None), None);
    }

    #[test]
    fn extracts_redis_url_from_free_text() {
        let extracted = extract_instance_id_from_message("can you check redis://prod-host:6379 for me");
        assert_eq!(extracted.as_deref(), Some("redis://prod-host:6379"));
    }

    #[test]
    fn returns_none_when_no_url_present() {
        assert_eq!(extract_instance_id_from_message("why is memory high"), None);
    }
}
