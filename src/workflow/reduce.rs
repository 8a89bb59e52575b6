//! Reduce stage: merges recommendation-worker output across topics into one
//! deduplicated, severity-sorted result.

use std::collections::HashSet;

use crate::models::{Recommendation, RecommendationStep, Topic};

/// Hashable dedup key for a single remediation step: same target+verb with
/// the same argument set (order-independent) counts as a duplicate even if
/// two different workers phrased it differently.
fn normalize_action(step: &RecommendationStep) -> String {
    let mut args: Vec<&str> = step.commands.as_deref().unwrap_or_default().iter().map(String::as_str).collect();
    args.sort_unstable();
    format!("{}|{}", step.description.trim().to_lowercase(), args.join(","))
}

fn dedupe_actions(steps: Vec<RecommendationStep>) -> Vec<RecommendationStep> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        let key = normalize_action(&step);
        if seen.insert(key) {
            out.push(step);
        }
    }
    out
}

pub fn sort_topics_by_severity(mut topics: Vec<Topic>) -> Vec<Topic> {
    topics.sort_by_key(|t| t.severity.rank());
    topics
}

pub struct ReducedPlan {
    pub merged_actions: Vec<RecommendationStep>,
    pub per_topic: Vec<(Topic, Recommendation)>,
    pub skipped_topic_ids: Vec<String>,
}

/// Merges one `Recommendation` per topic into a single deduplicated action
/// list, ordered by the owning topic's severity. Topics with no matching
/// recommendation are recorded as skipped rather than silently dropped.
pub fn reduce_plans(topics: Vec<Topic>, recommendations: Vec<Option<Recommendation>>) -> ReducedPlan {
    let sorted_topics = sort_topics_by_severity(topics);
    let mut merged_steps = Vec::new();
    let mut per_topic = Vec::new();
    let mut skipped = Vec::new();

    let rec_by_topic: std::collections::HashMap<String, Recommendation> = recommendations
        .into_iter()
        .flatten()
        .map(|r| (r.topic_id.clone(), r))
        .collect();

    for topic in sorted_topics {
        match rec_by_topic.get(&topic.id) {
            Some(rec) => {
                merged_steps.extend(rec.steps.clone());
                per_topic.push((topic, rec.clone()));
            }
            None => skipped.push(topic.id.clone()),
        }
    }

    ReducedPlan { merged_actions: dedupe_actions(merged_steps), per_topic, skipped_topic_ids: skipped }
}

#[cfg(test)]
mod reduce_tests {
    use super::*;
    use crate::models::Severity;

    fn topic(id: &str, severity: Severity) -> Topic {
        Topic {
            id: id.to_string(),
            title: id.to_string(),
            category: crate::models::Category::Other,
            severity,
            scope: "cluster".to_string(),
            narrative: None,
            evidence_keys: vec![],
        }
    }

    fn step(desc: &str, commands: Vec<&str>) -> RecommendationStep {
        RecommendationStep {
            description: desc.to_string(),
            commands: Some(commands.into_iter().map(String::from).collect()),
            api_examples: None,
            citations: vec![],
        }
    }

    #[test]
    fn sorts_topics_critical_first() {
        let topics = vec![topic("a", Severity::Low), topic("b", Severity::Critical), topic("c", Severity::Medium)];
        let sorted = sort_topics_by_severity(topics);
        assert_eq!(sorted[0].id, "b");
        assert_eq!(sorted.last().unwrap().id, "a");
    }

    #[test]
    fn dedupes_identical_actions_regardless_of_arg_order() {
        let steps = vec![
            step("restart replica", vec!["CONFIG SET", "a"]),
            step("restart replica", vec!["a", "CONFIG SET"]),
        ];
        let deduped = dedupe_actions(steps);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn skipped_topics_are_recorded_not_dropped_silently() {
        let topics = vec![topic("a", Severity::High)];
        let plan = reduce_plans(topics, vec![None]);
        assert_eq!(plan.skipped_topic_ids, vec!["a".to_string()]);
        assert!(plan.merged_actions.is_empty());
    }
}
