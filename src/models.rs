//! Shared domain types for the agent core: threads, tasks, instances,
//! knowledge chunks/citations, Q&A records, tool result envelopes, and the
//! recommendation/correction shapes the workflow engine produces.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default = "now_iso")]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl Default for ThreadMetadata {
    fn default() -> Self {
        Self {
            created_at: now_iso(),
            updated_at: None,
            user_id: None,
            session_id: None,
            priority: 0,
            tags: Vec::new(),
            subject: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: ThreadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub subject: String,
    pub created_at: String,
    pub updated_at: String,
    pub user_id: Option<String>,
    pub latest_message: String,
    pub tags: Vec<String>,
    pub priority: i64,
    pub instance_id: Option<String>,
}

// ---------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default = "now_iso")]
    pub timestamp: String,
    pub message: String,
    #[serde(default = "default_update_type")]
    pub update_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_update_type() -> String {
    "progress".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub thread_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub updates: Vec<TaskUpdate>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

// ---------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    RedisOss,
    RedisEnterprise,
    RedisCloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub usage: String,
    pub instance_type: InstanceType,
    /// Always envelope-encrypted at rest; decrypted only at point of use.
    pub connection_url: String,
    #[serde(default)]
    pub admin_password: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------
// Knowledge / Citation
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub category: String,
    pub severity: String,
    pub document_hash: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(default)]
    pub product_labels: Vec<String>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub is_target_chunk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub document_hash: String,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

impl Citation {
    pub fn from_chunk(chunk: &KnowledgeChunk, preview_len: usize) -> Self {
        let preview: String = chunk.content.chars().take(preview_len).collect();
        Self {
            document_id: chunk.id.clone(),
            document_hash: chunk.document_hash.clone(),
            chunk_index: Some(chunk.chunk_index),
            title: chunk.title.clone(),
            source: chunk.source.clone(),
            content_preview: Some(preview),
            score: chunk.score,
        }
    }
}

// ---------------------------------------------------------------------
// Q&A
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaFeedback {
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub feedback: Option<QaFeedback>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Filled in by the deferred embedding job, never at write time. Absent
    /// until that job succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------
// ResultEnvelope
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub tool_key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub args: serde_json::Map<String, serde_json::Value>,
    pub status: ToolStatus,
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ---------------------------------------------------------------------
// Topic / Recommendation / CorrectionResult
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    NodeInMaintenanceMode,
    ReplicationMismatch,
    MemoryPressure,
    Performance,
    Configuration,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub severity: Severity,
    pub scope: String,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub evidence_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationStep {
    pub description: String,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub api_examples: Option<Vec<String>>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub topic_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub steps: Vec<RecommendationStep>,
    #[serde(default)]
    pub risks: Option<String>,
    #[serde(default)]
    pub verification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub edited_response: String,
    #[serde(default)]
    pub edits_applied: Vec<String>,
}

#[cfg(test)]
mod role_tests {
    use super::*;

    #[test]
    fn lenient_role_parsing_defaults_to_user() {
        assert_eq!(Role::from_str_lenient("assistant"), Role::Assistant);
        assert_eq!(Role::from_str_lenient("system"), Role::System);
        assert_eq!(Role::from_str_lenient("tool"), Role::User);
        assert_eq!(Role::from_str_lenient("bogus"), Role::User);
    }
}


#[cfg(test)]
mod severity_tests {
    use super::*;

    #[test]
    fn severity_rank_orders_critical_first() {
        let mut ranks = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High, Severity::Info];
        ranks.sort_by_key(|s| s.rank());
        assert_eq!(
            ranks,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low, Severity::Info]
        );
    }
}

#[cfg(test)]
mod citation_tests {
    use super::*;

    #[test]
    fn preview_truncates_content() {
        let chunk = KnowledgeChunk {
            id: "doc-1".into(),
            title: "T".into(),
            content: "x".repeat(100),
            source: "https://redis.io".into(),
            category: "docs".into(),
            severity: "low".into(),
            document_hash: "hash".into(),
            chunk_index: 0,
            total_chunks: 1,
            product_labels: Vec::new(),
            score: Some(0.9),
            is_target_chunk: false,
        };
        let citation = Citation::from_chunk(&chunk, 10);
        assert_eq!(citation.content_preview.unwrap().len(), 10);
        assert_eq!(citation.document_hash, "hash");
    }
}

#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn message_without_metadata_round_trips() {
        let msg = Message { role: Role::Assistant, content: "hi".into(), metadata: None };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hi");
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn thread_metadata_defaults_are_applied_on_partial_json() {
        let partial = serde_json::json!({ "user_id": "u1" });
        let meta: ThreadMetadata = serde_json::from_value(partial).unwrap();
        assert_eq!(meta.user_id.as_deref(), Some("u1"));
        assert_eq!(meta.priority, 0);
        assert!(meta.tags.is_empty());
    }
}
