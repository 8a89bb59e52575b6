//! Single-agent-turn store: creation pre-indexes the task under its thread
//! at create time (not on first update), updates append-only, result/error
//! are write-once terminal transitions.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keyspace::{self, ENTITY_TTL_SECS};
use crate::models::{TaskMetadata, TaskState, TaskStatus, TaskUpdate};

pub struct TaskStore {
    redis: ConnectionManager,
}

impl TaskStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Creates the task in `Queued` status and indexes it under its thread
    /// immediately, so a thread's task list reflects queued-but-not-yet-run
    /// tasks.
    pub async fn create_task(&self, thread_id: &str, user_id: Option<&str>, subject: Option<&str>) -> Result<String> {
        let task_id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now();
        let metadata = TaskMetadata {
            created_at: Some(now.to_rfc3339()),
            updated_at: Some(now.to_rfc3339()),
            user_id: user_id.map(String::from),
            subject: subject.map(String::from),
        };

        let mut conn = self.redis.clone();
        let status_key = keyspace::task_status(&task_id);
        let metadata_key = keyspace::task_metadata(&task_id);
        let index_key = keyspace::thread_tasks_index(thread_id);

        let metadata_fields = task_metadata_to_fields(thread_id, &metadata);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SET").arg(&status_key).arg(TaskStatus::Queued.as_str()).ignore();
        pipe.cmd("HSET").arg(&metadata_key).arg(&metadata_fields).ignore();
        pipe.cmd("ZADD").arg(&index_key).arg(now.timestamp()).arg(&task_id).ignore();
        for key in [&status_key, &metadata_key] {
            pipe.cmd("EXPIRE").arg(key).arg(ENTITY_TTL_SECS).ignore();
        }
        pipe.cmd("EXPIRE").arg(&index_key).arg(ENTITY_TTL_SECS).ignore();
        pipe.query_async(&mut conn).await.context("failed to create task")?;

        Ok(task_id)
    }

    /// Terminal states are final: once a task is `done`, `failed`, or
    /// `cancelled`, no further status/update/result/error writes land.
    async fn is_terminal(&self, task_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let status_key = keyspace::task_status(task_id);
        let raw: Option<String> = conn.get(&status_key).await?;
        Ok(raw.and_then(|s| TaskStatus::from_str_opt(&s)).map(TaskStatus::is_terminal).unwrap_or(false))
    }

    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        if self.is_terminal(task_id).await? {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let status_key = keyspace::task_status(task_id);
        let metadata_key = keyspace::task_metadata(task_id);
        let _: () = conn.set(&status_key, status.as_str()).await?;
        let _: () = conn.hset(&metadata_key, "updated_at", chrono::Utc::now().to_rfc3339()).await?;
        let _: () = conn.expire(&status_key, ENTITY_TTL_SECS).await?;
        Ok(())
    }

    pub async fn add_update(&self, task_id: &str, message: &str, update_type: &str) -> Result<()> {
        if self.is_terminal(task_id).await? {
            return Ok(());
        }
        let update = TaskUpdate {
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: message.to_string(),
            update_type: update_type.to_string(),
            metadata: None,
        };
        let mut conn = self.redis.clone();
        let updates_key = keyspace::task_updates(task_id);
        let json = serde_json::to_string(&update)?;
        let _: () = conn.rpush(&updates_key, json).await?;
        let _: () = conn.expire(&updates_key, ENTITY_TTL_SECS).await?;
        Ok(())
    }

    /// Write-once: a result is set exactly once per task by the runner.
    pub async fn set_result(&self, task_id: &str, result: &serde_json::Value) -> Result<()> {
        if self.is_terminal(task_id).await? {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let result_key = keyspace::task_result(task_id);
        let json = serde_json::to_string(result)?;
        let _: () = conn.set(&result_key, json).await?;
        let _: () = conn.expire(&result_key, ENTITY_TTL_SECS).await?;
        self.update_status(task_id, TaskStatus::Done).await
    }

    /// Transitions the task to `Failed` and records the error message.
    pub async fn set_error(&self, task_id: &str, error_message: &str) -> Result<()> {
        if self.is_terminal(task_id).await? {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let error_key = keyspace::task_error(task_id);
        let _: () = conn.set(&error_key, error_message).await?;
        let _: () = conn.expire(&error_key, ENTITY_TTL_SECS).await?;
        self.update_status(task_id, TaskStatus::Failed).await
    }

    pub async fn get(&self, task_id: &str, thread_id: &str) -> Result<Option<TaskState>> {
        let mut conn = self.redis.clone();
        let status_key = keyspace::task_status(task_id);
        let raw_status: Option<String> = conn.get(&status_key).await?;
        let Some(raw_status) = raw_status else { return Ok(None) };
        let status = TaskStatus::from_str_opt(&raw_status).unwrap_or(TaskStatus::Queued);

        let updates_key = keyspace::task_updates(task_id);
        let raw_updates: Vec<String> = conn.lrange(&updates_key, 0, -1).await?;
        let updates: Vec<TaskUpdate> = raw_updates.iter().filter_map(|r| serde_json::from_str(r).ok()).collect();

        let result_key = keyspace::task_result(task_id);
        let raw_result: Option<String> = conn.get(&result_key).await?;
        let result = raw_result.and_then(|r| serde_json::from_str(&r).ok());

        let error_key = keyspace::task_error(task_id);
        let error_message: Option<String> = conn.get(&error_key).await?;

        let metadata_key = keyspace::task_metadata(task_id);
        let raw_metadata: std::collections::HashMap<String, String> = conn.hgetall(&metadata_key).await?;
        let metadata = TaskMetadata {
            created_at: raw_metadata.get("created_at").cloned(),
            updated_at: raw_metadata.get("updated_at").cloned(),
            user_id: raw_metadata.get("user_id").cloned().filter(|s| !s.is_empty()),
            subject: raw_metadata.get("subject").cloned().filter(|s| !s.is_empty()),
        };

        Ok(Some(TaskState {
            task_id: task_id.to_string(),
            thread_id: thread_id.to_string(),
            status,
            updates,
            result,
            error_message,
            metadata,
        }))
    }

    pub async fn list_for_thread(&self, thread_id: &str, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let index_key = keyspace::thread_tasks_index(thread_id);
        let ids: Vec<String> = conn.zrevrange(&index_key, 0, limit.saturating_sub(1) as isize).await?;
        Ok(ids)
    }

    pub async fn delete(&self, task_id: &str, thread_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let keys = keyspace::all_task_keys(task_id);
        let key_names: Vec<String> = keys.iter().map(|(_, k)| k.clone()).collect();
        let _: () = conn.del(&key_names).await?;
        let _: () = conn.zrem(keyspace::thread_tasks_index(thread_id), task_id).await?;
        Ok(())
    }
}

fn task_metadata_to_fields(thread_id: &str, metadata: &TaskMetadata) -> Vec<(String, String)> {
    vec![
        ("thread_id".to_string(), thread_id.to_string()),
        ("created_at".to_string(), metadata.created_at.clone().unwrap_or_default()),
        ("updated_at".to_string(), metadata.updated_at.clone().unwrap_or_default()),
        ("user_id".to_string(), metadata.user_id.clone().unwrap_or_default()),
        ("subject".to_string(), metadata.subject.clone().unwrap_or_default()),
    ]
}
