//! Synth stage: turns the reduced action plan into the final assistant
//! message. Tolerates gaps — when a recommendation has no concrete steps,
//! it emits an "investigate further" line instead of guessing.

use crate::models::{Citation, Recommendation, Topic};

pub struct SynthResult {
    pub message: String,
    pub citations: Vec<Citation>,
}

/// Renders the reduced recommendations into a single readable response.
/// A topic with no steps (evidence was too thin to recommend anything
/// concrete) gets an explicit "investigate further" line instead of being
/// silently omitted.
pub fn synthesize(topics_with_recs: &[(Topic, Recommendation)]) -> SynthResult {
    let mut sections = Vec::new();
    let mut citations = Vec::new();

    for (topic, rec) in topics_with_recs {
        let mut section = format!("## {}\n{}", topic.title, topic.narrative.as_deref().unwrap_or(""));
        if rec.steps.is_empty() {
            section.push_str("\n\n- Investigate further: insufficient evidence to recommend a specific action.");
        } else {
            for step in &rec.steps {
                section.push_str(&format!("\n\n- {}", step.description));
                if let Some(commands) = &step.commands {
                    for cmd in commands {
                        section.push_str(&format!("\n  `{cmd}`"));
                    }
                }
                citations.extend(step.citations.iter().cloned());
            }
        }
        if let Some(risks) = &rec.risks {
            section.push_str(&format!("\n\nRisks: {risks}"));
        }
        if let Some(verification) = &rec.verification {
            section.push_str(&format!("\n\nVerification: {verification}"));
        }
        sections.push(section);
    }

    SynthResult { message: sections.join("\n\n"), citations }
}

#[cfg(test)]
mod synth_tests {
    use super::*;
    use crate::models::{Category, RecommendationStep, Severity};

    fn topic() -> Topic {
        Topic {
            id: "p1".into(),
            title: "memory pressure".into(),
            category: Category::MemoryPressure,
            severity: Severity::High,
            scope: "cluster".into(),
            narrative: Some("climbing steadily".into()),
            evidence_keys: vec![],
        }
    }

    #[test]
    fn empty_steps_becomes_an_investigate_line() {
        let rec = Recommendation { topic_id: "p1".into(), title: None, steps: vec![], risks: None, verification: None };
        let result = synthesize(&[(topic(), rec)]);
        assert!(result.message.contains("Investigate further"));
        assert!(result.citations.is_empty());
    }

    #[test]
    fn steps_are_rendered_with_commands_and_citations_collected() {
        let citation = Citation {
            document_id: "doc-1".into(),
            document_hash: "hash".into(),
            chunk_index: Some(0),
            title: "Memory docs".into(),
            source: "https://redis.io".into(),
            content_preview: None,
            score: Some(0.9),
        };
        let rec = Recommendation {
            topic_id: "p1".into(),
            title: None,
            steps: vec![RecommendationStep {
                description: "reduce maxmemory".into(),
                commands: Some(vec!["CONFIG SET maxmemory 2gb".into()]),
                api_examples: None,
                citations: vec![citation],
            }],
            risks: Some("may evict hot keys".into()),
            verification: None,
        };
        let result = synthesize(&[(topic(), rec)]);
        assert!(result.message.contains("reduce maxmemory"));
        assert!(result.message.contains("CONFIG SET maxmemory 2gb"));
        assert!(result.message.contains("may evict hot keys"));
        assert_eq!(result.citations.len(), 1);
    }
}
