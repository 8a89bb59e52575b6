//! Durable conversation store: thread creation, context merge, message
//! append, subject generation, listing, and deletion, with migrate-on-read
//! support for threads that still carry messages inside their context blob
//! instead of the dedicated messages list.

use std::collections::HashMap;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keyspace::{self, ENTITY_TTL_SECS};
use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::models::{Message, Role, Thread, ThreadMetadata, ThreadSummary};

pub struct ThreadStore {
    redis: ConnectionManager,
}

impl ThreadStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn create(
        &self,
        user_id: Option<String>,
        session_id: Option<String>,
        initial_context: Option<HashMap<String, serde_json::Value>>,
        tags: Vec<String>,
    ) -> Result<String> {
        let thread_id = ulid::Ulid::new().to_string();
        let metadata = ThreadMetadata {
            user_id,
            session_id,
            tags,
            ..Default::default()
        };
        let thread = Thread {
            thread_id: thread_id.clone(),
            messages: Vec::new(),
            context: initial_context.unwrap_or_default(),
            metadata,
        };
        self.save_thread_state(&thread).await?;
        let _ = self.upsert_search_doc(&thread_id).await; // best-effort
        Ok(thread_id)
    }

    async fn save_thread_state(&self, thread: &Thread) -> Result<()> {
        let keys = keyspace::all_thread_keys(&thread.thread_id);
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        // Messages are rebuilt wholesale only at creation time; subsequent
        // writes always append (see append_messages).
        let messages_key = keyspace::thread_messages(&thread.thread_id);
        pipe.cmd("DEL").arg(&messages_key).ignore();
        for m in &thread.messages {
            let json = serde_json::to_string(m)?;
            pipe.cmd("RPUSH").arg(&messages_key).arg(json).ignore();
        }

        // Context never persists a "messages" key — that's the legacy path.
        let context_key = keyspace::thread_context(&thread.thread_id);
        let mut clean_context: Vec<(String, String)> = Vec::new();
        for (k, v) in &thread.context {
            if k == "messages" {
                continue;
            }
            clean_context.push((k.clone(), stringify_context_value(v)));
        }
        if !clean_context.is_empty() {
            pipe.cmd("HSET").arg(&context_key).arg(&clean_context).ignore();
        }

        let metadata_key = keyspace::thread_metadata(&thread.thread_id);
        let metadata_fields = metadata_to_hash_fields(&thread.metadata);
        pipe.cmd("HSET").arg(&metadata_key).arg(&metadata_fields).ignore();

        for (_, key) in &keys {
            pipe.cmd("EXPIRE").arg(key).arg(ENTITY_TTL_SECS).ignore();
        }

        pipe.query_async(&mut conn).await.context("failed to save thread state")?;
        Ok(())
    }

    pub async fn get(&self, thread_id: &str) -> Result<Option<Thread>> {
        let mut conn = self.redis.clone();
        let metadata_key = keyspace::thread_metadata(thread_id);
        let exists: bool = conn.exists(&metadata_key).await?;
        if !exists {
            return Ok(None);
        }

        let messages_key = keyspace::thread_messages(thread_id);
        let raw_messages: Vec<String> = conn.lrange(&messages_key, 0, -1).await?;
        let mut messages: Vec<Message> = raw_messages
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();

        let context_key = keyspace::thread_context(thread_id);
        let raw_context: HashMap<String, String> = conn.hgetall(&context_key).await?;
        let mut context: HashMap<String, serde_json::Value> = raw_context
            .into_iter()
            .map(|(k, v)| (k, parse_context_value(&v)))
            .collect();

        let metadata_key_fields: HashMap<String, String> = conn.hgetall(&metadata_key).await?;
        let metadata = hash_fields_to_metadata(&metadata_key_fields);

        // Backward compatibility: pre-separation threads kept messages
        // inside context["messages"]. Migrate-on-read, strip the legacy key.
        if messages.is_empty() {
            if let Some(serde_json::Value::Array(legacy)) = context.get("messages").cloned() {
                for item in legacy {
                    let Some(obj) = item.as_object() else { continue };
                    let content = obj.get("content").and_then(|v| v.as_str()).unwrap_or_default();
                    if content.is_empty() {
                        continue;
                    }
                    let role = obj
                        .get("role")
                        .and_then(|v| v.as_str())
                        .map(Role::from_str_lenient)
                        .unwrap_or(Role::User);
                    messages.push(Message { role, content: content.to_string(), metadata: None });
                }
            }
        }
        context.remove("messages");

        Ok(Some(Thread { thread_id: thread_id.to_string(), messages, context, metadata }))
    }

    pub async fn update_context(
        &self,
        thread_id: &str,
        updates: HashMap<String, serde_json::Value>,
        merge: bool,
    ) -> Result<()> {
        let mut conn = self.redis.clone();
        let context_key = keyspace::thread_context(thread_id);

        let mut final_map: HashMap<String, String> = if merge {
            conn.hgetall(&context_key).await?
        } else {
            let _: () = conn.del(&context_key).await?;
            HashMap::new()
        };

        for (k, v) in updates {
            final_map.insert(k, stringify_context_value(&v));
        }

        if !final_map.is_empty() {
            let fields: Vec<(String, String)> = final_map.into_iter().collect();
            let _: () = conn.hset_multiple(&context_key, &fields).await?;
        }

        self.touch_updated_at(thread_id).await?;
        let _: () = conn.expire(&context_key, ENTITY_TTL_SECS).await?;
        Ok(())
    }

    pub async fn append_messages(&self, thread_id: &str, messages: Vec<serde_json::Value>) -> Result<()> {
        let mut conn = self.redis.clone();
        let messages_key = keyspace::thread_messages(thread_id);

        for raw in messages {
            let Some(obj) = raw.as_object() else { continue };
            let content = obj.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            if content.is_empty() {
                continue;
            }
            let role = obj
                .get("role")
                .and_then(|v| v.as_str())
                .map(Role::from_str_lenient)
                .unwrap_or(Role::User);
            let metadata = obj.get("metadata").cloned();
            let message = Message { role, content: content.to_string(), metadata };
            let json = serde_json::to_string(&message)?;
            let _: () = conn.rpush(&messages_key, json).await?;
        }

        let _: () = conn.expire(&messages_key, ENTITY_TTL_SECS).await?;
        self.touch_updated_at(thread_id).await?;
        let _ = self.upsert_search_doc(thread_id).await;
        Ok(())
    }

    pub async fn set_subject(&self, thread_id: &str, subject: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let metadata_key = keyspace::thread_metadata(thread_id);
        let _: () = conn.hset(&metadata_key, "subject", subject).await?;
        self.touch_updated_at(thread_id).await?;
        let _ = self.upsert_search_doc(thread_id).await;
        Ok(())
    }

    /// Generates a short subject via the LLM (≤50 chars). Never fails the
    /// caller: on any LLM error it falls back to a truncated version of
    /// `original_message`.
    pub async fn generate_subject(&self, thread_id: &str, llm: &dyn LlmClient, original_message: &str) -> Result<()> {
        let subject = match self.try_generate_subject_via_llm(llm, original_message).await {
            Ok(s) if !s.is_empty() => s,
            _ => truncate_fallback(original_message, 50),
        };
        self.set_subject(thread_id, &subject).await
    }

    async fn try_generate_subject_via_llm(&self, llm: &dyn LlmClient, original_message: &str) -> Result<String> {
        let prompt = format!(
            "Generate a concise subject line (max 50 characters) for this conversation, \
             based on the user's first message. Respond with only the subject, no quotes.\n\n{original_message}"
        );
        let resp = llm
            .chat(&[ChatMessage { role: ChatRole::User, content: prompt, tool_call_ids: vec![] }])
            .await?;
        let cleaned = resp.content.trim().trim_matches('"').trim_matches('\'').to_string();
        Ok(truncate_fallback(&cleaned, 50))
    }

    pub async fn list(&self, user_id: Option<&str>, limit: usize, offset: usize) -> Result<Vec<ThreadSummary>> {
        let mut conn = self.redis.clone();
        let index_key = match user_id {
            Some(uid) => keyspace::threads_user_index(uid),
            None => keyspace::threads_index(),
        };
        let ids: Vec<String> = conn
            .zrevrange(&index_key, offset as isize, (offset + limit).saturating_sub(1) as isize)
            .await
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for thread_id in ids {
            if let Some(thread) = self.get(&thread_id).await? {
                out.push(ThreadSummary {
                    thread_id: thread.thread_id,
                    subject: thread.metadata.subject.unwrap_or_else(|| "Untitled".to_string()),
                    created_at: thread.metadata.created_at,
                    updated_at: thread.metadata.updated_at.unwrap_or_default(),
                    user_id: thread.metadata.user_id,
                    // Fixed placeholder rather than a per-row extra read; see DESIGN.md.
                    latest_message: "No updates".to_string(),
                    tags: thread.metadata.tags,
                    priority: thread.metadata.priority,
                    instance_id: thread.context.get("instance_id").and_then(|v| v.as_str()).map(String::from),
                });
            }
        }
        Ok(out)
    }

    /// Idempotent: deleting an already-gone thread returns `Ok(())`.
    pub async fn delete(&self, thread_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let metadata_key = keyspace::thread_metadata(thread_id);
        let metadata_fields: HashMap<String, String> = conn.hgetall(&metadata_key).await.unwrap_or_default();
        let user_id = metadata_fields.get("user_id").cloned();

        let keys = keyspace::all_thread_keys(thread_id);
        let key_names: Vec<String> = keys.iter().map(|(_, k)| k.clone()).collect();
        if !key_names.is_empty() {
            let _: () = conn.del(&key_names).await?;
        }

        let _: () = conn.zrem(keyspace::threads_index(), thread_id).await?;
        if let Some(uid) = user_id {
            if !uid.is_empty() {
                let _: () = conn.zrem(keyspace::threads_user_index(&uid), thread_id).await?;
            }
        }
        let _: () = conn.del(keyspace::thread_search_doc(thread_id)).await?;
        Ok(())
    }

    async fn touch_updated_at(&self, thread_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let metadata_key = keyspace::thread_metadata(thread_id);
        let now = chrono::Utc::now().to_rfc3339();
        let _: () = conn.hset(&metadata_key, "updated_at", &now).await?;
        let _: () = conn.expire(&metadata_key, ENTITY_TTL_SECS).await?;
        Ok(())
    }

    /// Best-effort: failures here are logged, never propagated — the
    /// search doc is a read-acceleration structure, not the source of
    /// truth.
    async fn upsert_search_doc(&self, thread_id: &str) -> Result<()> {
        let Some(thread) = self.get(thread_id).await? else { return Ok(()) };
        let mut conn = self.redis.clone();
        let doc_key = keyspace::thread_search_doc(thread_id);
        let instance_id = thread.context.get("instance_id").and_then(|v| v.as_str()).unwrap_or_default();
        let fields: Vec<(&str, String)> = vec![
            ("subject", thread.metadata.subject.clone().unwrap_or_default()),
            ("user_id", thread.metadata.user_id.clone().unwrap_or_default()),
            ("instance_id", instance_id.to_string()),
            ("priority", thread.metadata.priority.to_string()),
            ("created_at", thread.metadata.created_at.clone()),
            ("updated_at", thread.metadata.updated_at.clone().unwrap_or_default()),
            ("tags", thread.metadata.tags.join(",")),
        ];
        let _: () = conn.hset_multiple(&doc_key, &fields).await?;
        let _: () = conn.expire(&doc_key, ENTITY_TTL_SECS).await?;
        Ok(())
    }
}

fn stringify_context_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_context_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn metadata_to_hash_fields(metadata: &ThreadMetadata) -> Vec<(String, String)> {
    vec![
        ("created_at".to_string(), metadata.created_at.clone()),
        ("updated_at".to_string(), metadata.updated_at.clone().unwrap_or_else(|| metadata.created_at.clone())),
        ("user_id".to_string(), metadata.user_id.clone().unwrap_or_default()),
        ("session_id".to_string(), metadata.session_id.clone().unwrap_or_default()),
        ("priority".to_string(), metadata.priority.to_string()),
        ("tags".to_string(), serde_json::to_string(&metadata.tags).unwrap_or_default()),
        ("subject".to_string(), metadata.subject.clone().unwrap_or_default()),
    ]
}

fn hash_fields_to_metadata(fields: &HashMap<String, String>) -> ThreadMetadata {
    let tags: Vec<String> = fields
        .get("tags")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    ThreadMetadata {
        created_at: fields.get("created_at").cloned().unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        updated_at: fields.get("updated_at").cloned().filter(|s| !s.is_empty()),
        user_id: fields.get("user_id").cloned().filter(|s| !s.is_empty()),
        session_id: fields.get("session_id").cloned().filter(|s| !s.is_empty()),
        priority: fields.get("priority").and_then(|s| s.parse().ok()).unwrap_or(0),
        tags,
        subject: fields.get("subject").cloned().filter(|s| !s.is_empty()),
    }
}

fn truncate_fallback(message: &str, max_len: usize) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= max_len {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(max_len).collect();
        format!("{}...", truncated.trim_end())
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn truncate_fallback_leaves_short_messages_untouched() {
        assert_eq!(truncate_fallback("short message", 50), "short message");
    }

    #[test]
    fn truncate_fallback_truncates_and_appends_ellipsis() {
        let long = "x".repeat(80);
        let out = truncate_fallback(&long, 50);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 53);
    }

    #[test]
    fn metadata_hash_round_trips_through_fields() {
        let meta = ThreadMetadata {
            user_id: Some("u1".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
            priority: 3,
            ..Default::default()
        };
        let fields: HashMap<String, String> = metadata_to_hash_fields(&meta).into_iter().collect();
        let back = hash_fields_to_metadata(&fields);
        assert_eq!(back.user_id.as_deref(), Some("u1"));
        assert_eq!(back.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(back.priority, 3);
    }

    #[test]
    fn context_value_stringification_round_trips_json_and_strings() {
        let s = serde_json::Value::String("plain".to_string());
        assert_eq!(stringify_context_value(&s), "plain");
        assert_eq!(parse_context_value("plain"), serde_json::Value::String("plain".to_string()));

        let obj = serde_json::json!({"a": 1});
        let stringified = stringify_context_value(&obj);
        assert_eq!(parse_context_value(&stringified), obj);
    }
}
