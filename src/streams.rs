//! Per-task event bus over a Redis Stream: raw XADD/XREAD command
//! construction, no consumer groups. Live subscribers (websocket/SSE
//! handlers) register in an in-process set; the first subscriber for a task
//! lazily starts a single shared consumer that reads the stream and
//! broadcasts to every registered subscriber, pruning any that can no
//! longer accept a message and stopping once none are left.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::keyspace;
use crate::models::TaskUpdate;
use crate::task_store::TaskStore;

/// Bounded so a stalled subscriber applies backpressure to the consumer
/// rather than the bus buffering unbounded memory on its behalf.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;
const CONSUMER_BATCH: usize = 50;
const CONSUMER_BLOCK_MS: usize = 2_000;
const INITIAL_SNAPSHOT_UPDATE_COUNT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStreamEvent {
    pub thread_id: String,
    pub update_type: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStateEvent {
    #[serde(flatten)]
    pub base: TaskStreamEvent,
    pub updates: Vec<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

type SubscriberMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<TaskStreamEvent>>>>>;

pub struct StreamBus {
    redis: ConnectionManager,
    tasks: Arc<TaskStore>,
    subscribers: SubscriberMap,
    running_consumers: Arc<Mutex<HashSet<String>>>,
}

impl StreamBus {
    pub fn new(redis: ConnectionManager, tasks: Arc<TaskStore>) -> Self {
        Self {
            redis,
            tasks,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            running_consumers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Subscribes to `task_id`'s stream. Verifies the task exists (returns
    /// `Ok(None)` otherwise), registers the subscriber, sends it an initial
    /// snapshot of where the task currently stands, and lazily starts the
    /// shared consumer for this task if one isn't already running.
    pub async fn subscribe(&self, task_id: &str, thread_id: &str) -> Result<Option<mpsc::Receiver<TaskStreamEvent>>> {
        let Some(task) = self.tasks.get(task_id, thread_id).await? else {
            return Ok(None);
        };

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let snapshot = TaskStreamEvent {
            thread_id: thread_id.to_string(),
            update_type: "initial_state".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            extra: initial_snapshot_extra(&task),
        };
        let _ = tx.send(snapshot).await;

        {
            let mut subs = self.subscribers.lock().await;
            subs.entry(task_id.to_string()).or_default().push(tx);
        }

        let should_start = {
            let mut running = self.running_consumers.lock().await;
            running.insert(task_id.to_string())
        };
        if should_start {
            spawn_consumer(self.redis.clone(), Arc::clone(&self.subscribers), Arc::clone(&self.running_consumers), task_id.to_string());
        }

        Ok(Some(rx))
    }

    pub async fn publish(&self, task_id: &str, event: &TaskStreamEvent) -> Result<String> {
        let mut conn = self.redis.clone();
        let key = keyspace::task_stream(task_id);
        let payload = serde_json::to_string(event)?;
        let id: String = redis::cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("event")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("XADD failed")?;
        Ok(id)
    }

    pub async fn publish_initial_state(&self, task_id: &str, event: &InitialStateEvent) -> Result<String> {
        let mut conn = self.redis.clone();
        let key = keyspace::task_stream(task_id);
        let payload = serde_json::to_string(event)?;
        let id: String = redis::cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("event")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("XADD failed")?;
        Ok(id)
    }

    /// Reads events with id greater than `after_id` ("0" for "from the
    /// start"). Blocking reads are left to callers via a poll loop rather
    /// than threaded through this call, mirroring the referenced example's
    /// separation of a single read from its surrounding poll loop.
    pub async fn read_since(&self, task_id: &str, after_id: &str, count: usize) -> Result<Vec<(String, TaskStreamEvent)>> {
        let mut conn = self.redis.clone();
        let key = keyspace::task_stream(task_id);
        let raw: redis::Value = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&key)
            .arg(after_id)
            .query_async(&mut conn)
            .await
            .context("XREAD failed")?;
        Ok(parse_xread(raw))
    }

    /// Polls `read_since` on an interval until `is_done` returns true or
    /// `max_polls` is reached, invoking `on_event` for each new entry.
    pub async fn poll_until_done<F, D>(
        &self,
        task_id: &str,
        poll_interval: std::time::Duration,
        max_polls: usize,
        mut on_event: F,
        mut is_done: D,
    ) -> Result<()>
    where
        F: FnMut(&TaskStreamEvent),
        D: FnMut() -> bool,
    {
        let mut last_id = "0".to_string();
        for _ in 0..max_polls {
            let events = self.read_since(task_id, &last_id, 100).await?;
            for (id, event) in &events {
                on_event(event);
                last_id = id.clone();
            }
            if is_done() {
                return Ok(());
            }
            tokio::time::sleep(poll_interval).await;
        }
        Ok(())
    }
}

fn initial_snapshot_extra(task: &crate::models::TaskState) -> HashMap<String, serde_json::Value> {
    let skip = task.updates.len().saturating_sub(INITIAL_SNAPSHOT_UPDATE_COUNT);
    let recent: Vec<&TaskUpdate> = task.updates.iter().skip(skip).collect();
    let mut extra = HashMap::new();
    extra.insert("status".to_string(), serde_json::json!(task.status.as_str()));
    extra.insert("updates".to_string(), serde_json::to_value(recent).unwrap_or_default());
    extra.insert("result".to_string(), task.result.clone().unwrap_or(serde_json::Value::Null));
    extra.insert(
        "error_message".to_string(),
        task.error_message.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
    );
    extra
}

fn spawn_consumer(redis: ConnectionManager, subscribers: SubscriberMap, running: Arc<Mutex<HashSet<String>>>, task_id: String) {
    tokio::spawn(async move {
        consumer_loop(redis, subscribers, task_id.clone()).await;
        running.lock().await.remove(&task_id);
    });
}

/// Reads the stream with a bounded block, broadcasting each new entry to
/// every live subscriber concurrently. Closed or send-failing subscribers
/// are dropped from the set; the loop exits once the set is empty, which in
/// turn lets the task-level entry in `running_consumers` be cleared.
async fn consumer_loop(redis: ConnectionManager, subscribers: SubscriberMap, task_id: String) {
    let key = keyspace::task_stream(&task_id);
    let mut last_id = "$".to_string();

    loop {
        {
            let mut subs = subscribers.lock().await;
            if let Some(list) = subs.get_mut(&task_id) {
                list.retain(|s| !s.is_closed());
            }
            let empty = subs.get(&task_id).map(|v| v.is_empty()).unwrap_or(true);
            if empty {
                subs.remove(&task_id);
                break;
            }
        }

        let mut conn = redis.clone();
        let raw: redis::RedisResult<redis::Value> = redis::cmd("XREAD")
            .arg("BLOCK")
            .arg(CONSUMER_BLOCK_MS)
            .arg("COUNT")
            .arg(CONSUMER_BATCH)
            .arg("STREAMS")
            .arg(&key)
            .arg(&last_id)
            .query_async(&mut conn)
            .await;

        let entries = match raw {
            Ok(v) => parse_xread(v),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "stream consumer XREAD failed, backing off");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                continue;
            }
        };

        for (id, event) in entries {
            last_id = id;

            let current = {
                let subs = subscribers.lock().await;
                subs.get(&task_id).cloned().unwrap_or_default()
            };
            if current.is_empty() {
                continue;
            }

            let sent = join_all(current.iter().map(|s| {
                let event = event.clone();
                async move { s.send(event).await.is_ok() }
            }))
            .await;

            if sent.iter().any(|ok| !ok) {
                let mut subs = subscribers.lock().await;
                if let Some(list) = subs.get_mut(&task_id) {
                    let mut idx = 0;
                    list.retain(|_| {
                        let keep = sent.get(idx).copied().unwrap_or(true);
                        idx += 1;
                        keep
                    });
                }
            }
        }
    }
}

fn parse_xread(raw: redis::Value) -> Vec<(String, TaskStreamEvent)> {
    let redis::Value::Bulk(streams) = raw else { return Vec::new() };
    let mut out = Vec::new();
    for stream in streams {
        let redis::Value::Bulk(stream_parts) = stream else { continue };
        if stream_parts.len() < 2 {
            continue;
        }
        let redis::Value::Bulk(entries) = &stream_parts[1] else { continue };
        for entry in entries {
            let redis::Value::Bulk(entry_parts) = entry else { continue };
            if entry_parts.len() < 2 {
                continue;
            }
            let redis::Value::Data(id_bytes) = &entry_parts[0] else { continue };
            let id = String::from_utf8_lossy(id_bytes).to_string();
            let redis::Value::Bulk(fields) = &entry_parts[1] else { continue };
            let mut j = 0;
            while j + 1 < fields.len() {
                if let (redis::Value::Data(k), redis::Value::Data(v)) = (&fields[j], &fields[j + 1]) {
                    if k == b"event" {
                        if let Ok(event) = serde_json::from_slice::<TaskStreamEvent>(v) {
                            out.push((id.clone(), event));
                        }
                    }
                }
                j += 2;
            }
        }
    }
    out
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn task_stream_event_keeps_extra_fields() {
        let event = TaskStreamEvent {
            thread_id: "t1".into(),
            update_type: "progress".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            extra: HashMap::from([("message".to_string(), serde_json::json!("working on it"))]),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TaskStreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra.get("message").unwrap(), "working on it");
    }

    #[test]
    fn initial_state_event_flattens_base_fields() {
        let event = InitialStateEvent {
            base: TaskStreamEvent {
                thread_id: "t1".into(),
                update_type: "initial_state".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
                extra: HashMap::new(),
            },
            updates: vec![],
            result: None,
            error_message: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"thread_id\":\"t1\""));
    }

    #[test]
    fn initial_snapshot_keeps_only_the_last_ten_updates() {
        use crate::models::{TaskState, TaskStatus, TaskUpdate};

        let updates: Vec<TaskUpdate> = (0..15)
            .map(|i| TaskUpdate { timestamp: format!("t{i}"), message: format!("update {i}"), update_type: "progress".into(), metadata: None })
            .collect();
        let task = TaskState {
            task_id: "task-1".into(),
            thread_id: "thread-1".into(),
            status: TaskStatus::InProgress,
            updates,
            result: None,
            error_message: None,
            metadata: Default::default(),
        };

        let extra = initial_snapshot_extra(&task);
        let serde_json::Value::Array(kept) = extra.get("updates").unwrap() else { panic!("expected array") };
        assert_eq!(kept.len(), 10);
        assert_eq!(kept[0]["message"], "update 5");
        assert_eq!(kept[9]["message"], "update 14");
    }
}
