//! Diagnose stage: turns free-form LLM output into a list of well-formed
//! `Topic`s — closed-set category/severity with fallback, dropped entries
//! missing an id, tolerant fenced-JSON parsing.

use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::{Category, Severity, Topic};

pub fn make_diagnose_prompt(signals_summary: &str) -> String {
    format!(
        "You are diagnosing a Redis operational issue from the signals below. \
         Return a JSON array of problems, each with: id, title, category \
         (one of: node_in_maintenance_mode, replication_mismatch, memory_pressure, \
         performance, configuration, other), severity (critical, high, medium, low, info), \
         scope, narrative, evidence_keys.\n\nSignals:\n{signals_summary}"
    )
}

#[derive(serde::Deserialize)]
struct RawProblem {
    id: Option<String>,
    title: Option<String>,
    category: Option<String>,
    severity: Option<String>,
    scope: Option<String>,
    narrative: Option<String>,
    #[serde(default)]
    evidence_keys: Vec<serde_json::Value>,
}

fn normalize_category(raw: Option<&str>) -> Category {
    match raw.unwrap_or_default() {
        "node_in_maintenance_mode" => Category::NodeInMaintenanceMode,
        "replication_mismatch" => Category::ReplicationMismatch,
        "memory_pressure" => Category::MemoryPressure,
        "performance" => Category::Performance,
        "configuration" => Category::Configuration,
        _ => Category::Other,
    }
}

fn normalize_severity(raw: Option<&str>) -> Severity {
    match raw.unwrap_or_default() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "low" => Severity::Low,
        "info" => Severity::Info,
        _ => Severity::Medium,
    }
}

fn normalize_problem(raw: RawProblem) -> Option<Topic> {
    let id = raw.id?;
    if id.is_empty() {
        return None;
    }
    Some(Topic {
        id,
        title: raw.title.unwrap_or_else(|| "Untitled issue".to_string()),
        category: normalize_category(raw.category.as_deref()),
        severity: normalize_severity(raw.severity.as_deref()),
        scope: raw.scope.filter(|s| !s.is_empty()).unwrap_or_else(|| "cluster".to_string()),
        narrative: raw.narrative,
        evidence_keys: raw.evidence_keys.iter().map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string())).collect(),
    })
}

/// Strips Markdown code fences an LLM sometimes wraps JSON in before
/// parsing it as an array. Returns an empty vec on any parse failure rather
/// than erroring — a malformed diagnosis means "no problems found", not a
/// pipeline failure.
pub fn parse_problems(raw: &str) -> Vec<Topic> {
    let cleaned = strip_fences(raw);
    let parsed: Result<Vec<RawProblem>, _> = serde_json::from_str(&cleaned);
    match parsed {
        Ok(problems) => problems.into_iter().filter_map(normalize_problem).collect(),
        Err(_) => Vec::new(),
    }
}

fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim().to_string()
}

pub async fn diagnose(llm: &dyn LlmClient, signals_summary: &str) -> Vec<Topic> {
    let prompt = make_diagnose_prompt(signals_summary);
    let messages = [ChatMessage { role: ChatRole::User, content: prompt, tool_call_ids: vec![] }];
    match llm.structured_raw(&messages, "ProblemList").await {
        Ok(raw) => parse_problems(&raw),
        Err(e) => {
            tracing::warn!(error = %e, "diagnose call failed, returning no problems");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod diagnose_tests {
    use super::*;

    #[test]
    fn normalizes_unknown_category_and_severity_to_fallback() {
        let raw = RawProblem {
            id: Some("p1".into()),
            title: Some("weird issue".into()),
            category: Some("bogus_category".into()),
            severity: Some("apocalyptic".into()),
            scope: None,
            narrative: None,
            evidence_keys: vec![],
        };
        let topic = normalize_problem(raw).unwrap();
        assert_eq!(topic.category, Category::Other);
        assert_eq!(topic.severity, Severity::Medium);
        assert_eq!(topic.scope, "cluster");
    }

    #[test]
    fn empty_scope_string_defaults_to_cluster_same_as_missing() {
        let raw = RawProblem {
            id: Some("p1".into()),
            title: None,
            category: None,
            severity: None,
            scope: Some(String::new()),
            narrative: None,
            evidence_keys: vec![],
        };
        let topic = normalize_problem(raw).unwrap();
        assert_eq!(topic.scope, "cluster");
    }

    #[test]
    fn drops_problems_missing_an_id() {
        let raw = RawProblem {
            id: None,
            title: Some("no id".into()),
            category: None,
            severity: None,
            scope: None,
            narrative: None,
            evidence_keys: vec![],
        };
        assert!(normalize_problem(raw).is_none());
    }

    #[test]
    fn parse_problems_tolerates_fenced_json() {
        let raw = "```json\n[{\"id\": \"p1\", \"title\": \"t\", \"category\": \"performance\", \"severity\": \"high\"}]\n```";
        let problems = parse_problems(raw);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].category, Category::Performance);
    }

    #[test]
    fn parse_problems_returns_empty_on_garbage() {
        assert!(parse_problems("not json at all").is_empty());
    }
}
