//! Per-topic recommendation worker, run in parallel across diagnosed
//! topics. On JSON-parse failure the worker still returns a recommendation
//! shell rather than dropping the topic, carrying the raw text forward as
//! a narrative so synth has something to work with.

use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::{Recommendation, Topic};

pub fn make_recommendation_prompt(topic: &Topic, knowledge_context: &str) -> String {
    format!(
        "Produce a remediation plan for this issue:\n\nTitle: {}\nCategory: {:?}\nSeverity: {:?}\nScope: {}\nNarrative: {}\n\n\
         Relevant documentation:\n{knowledge_context}\n\n\
         Respond as JSON: {{\"topic_id\": \"{}\", \"title\": ..., \"steps\": [{{\"description\": ..., \"commands\": [...], \
         \"api_examples\": [...]}}], \"risks\": ..., \"verification\": ...}}",
        topic.title,
        topic.category,
        topic.severity,
        topic.scope,
        topic.narrative.as_deref().unwrap_or("none"),
        topic.id,
    )
}

/// Produces one recommendation per topic, running each worker
/// independently so a single parse failure never blocks the others.
pub async fn recommend_for_topic(llm: &dyn LlmClient, topic: &Topic, knowledge_context: &str) -> Recommendation {
    let prompt = make_recommendation_prompt(topic, knowledge_context);
    let messages = [ChatMessage { role: ChatRole::User, content: prompt, tool_call_ids: vec![] }];

    let raw = match llm.structured_raw(&messages, "Recommendation").await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(topic_id = %topic.id, error = %e, "recommendation worker llm call failed");
            return fallback_recommendation(topic, "planning_failed", "");
        }
    };

    match crate::llm::parse_structured::<Recommendation>(&raw) {
        Ok(rec) => rec,
        Err(_) => fallback_recommendation(topic, "planning_failed", &raw),
    }
}

fn fallback_recommendation(topic: &Topic, summary: &str, raw: &str) -> Recommendation {
    Recommendation {
        topic_id: topic.id.clone(),
        title: Some(summary.to_string()),
        steps: Vec::new(),
        risks: None,
        verification: if raw.is_empty() { None } else { Some(raw.to_string()) },
    }
}

#[cfg(test)]
mod worker_tests {
    use super::*;
    use crate::llm::FakeLlmClient;
    use crate::models::{Category, Severity};

    fn sample_topic() -> Topic {
        Topic {
            id: "p1".to_string(),
            title: "memory pressure on primary".to_string(),
            category: Category::MemoryPressure,
            severity: Severity::High,
            scope: "node-1".to_string(),
            narrative: Some("used_memory close to maxmemory".to_string()),
            evidence_keys: vec!["used_memory".to_string()],
        }
    }

    #[tokio::test]
    async fn parses_a_well_formed_recommendation() {
        let llm = FakeLlmClient::new(vec![
            "{\"topic_id\": \"p1\", \"title\": \"free memory\", \"steps\": [], \"risks\": null, \"verification\": null}",
        ]);
        let rec = recommend_for_topic(&llm, &sample_topic(), "").await;
        assert_eq!(rec.topic_id, "p1");
        assert_eq!(rec.title.as_deref(), Some("free memory"));
    }

    #[tokio::test]
    async fn falls_back_on_unparseable_response_without_dropping_the_topic() {
        let llm = FakeLlmClient::new(vec!["not valid json at all"]);
        let rec = recommend_for_topic(&llm, &sample_topic(), "").await;
        assert_eq!(rec.topic_id, "p1");
        assert_eq!(rec.title.as_deref(), Some("planning_failed"));
        assert!(rec.verification.is_some());
    }
}
