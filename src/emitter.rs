//! Progress reporting fan-out: a small `ProgressEmitter` contract with
//! several interchangeable sinks (task-store persistence, CLI rendering,
//! MCP progress reporting, plain logging, a legacy callback bridge) and a
//! composite that fans out to all of them concurrently.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::task_store::TaskStore;

#[async_trait]
pub trait ProgressEmitter: Send + Sync {
    async fn emit(&self, update_type: &str, message: &str);
}

/// Persists each update onto the task's update list. Never propagates
/// failures to the caller — a progress sink going down shouldn't fail the
/// underlying work.
pub struct TaskEmitter {
    store: Arc<TaskStore>,
    task_id: String,
}

impl TaskEmitter {
    pub fn new(store: Arc<TaskStore>, task_id: impl Into<String>) -> Self {
        Self { store, task_id: task_id.into() }
    }
}

#[async_trait]
impl ProgressEmitter for TaskEmitter {
    async fn emit(&self, update_type: &str, message: &str) {
        if let Err(e) = self.store.add_update(&self.task_id, message, update_type).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "failed to persist task update");
        }
    }
}

/// Renders to stderr with ANSI color when attached to a TTY, plain text
/// otherwise.
pub struct CliEmitter {
    use_color: bool,
}

impl CliEmitter {
    pub fn new() -> Self {
        Self { use_color: std::io::stderr().is_terminal() }
    }

    fn style(update_type: &str) -> (&'static str, &'static str) {
        match update_type {
            "agent_start" | "task_start" => ("▶", "\x1b[2m"),
            "agent_processing" => ("…", "\x1b[2m"),
            "agent_reflection" => ("↺", "\x1b[35m"),
            "tool_call" => ("→", "\x1b[36m"),
            "knowledge_sources" => ("▤", "\x1b[34m"),
            "progress" => ("·", "\x1b[2m"),
            "instance_context" | "instance_created" => ("◆", "\x1b[36m"),
            "agent_complete" => ("✓", "\x1b[32m"),
            "agent_error" | "instance_error" | "error" => ("✗", "\x1b[31m"),
            _ => ("·", "\x1b[0m"),
        }
    }
}

impl Default for CliEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressEmitter for CliEmitter {
    async fn emit(&self, update_type: &str, message: &str) {
        let (symbol, color) = Self::style(update_type);
        if self.use_color {
            eprintln!("{color}{symbol} {message}\x1b[0m");
        } else {
            eprintln!("{symbol} {message}");
        }
    }
}

/// Reports progress as a monotonically increasing counter, matching the MCP
/// protocol's progress-notification shape.
pub struct McpEmitter<F>
where
    F: Fn(u64, &str) + Send + Sync,
{
    counter: AtomicU64,
    report: F,
}

impl<F> McpEmitter<F>
where
    F: Fn(u64, &str) + Send + Sync,
{
    pub fn new(report: F) -> Self {
        Self { counter: AtomicU64::new(0), report }
    }
}

#[async_trait]
impl<F> ProgressEmitter for McpEmitter<F>
where
    F: Fn(u64, &str) + Send + Sync,
{
    async fn emit(&self, _update_type: &str, message: &str) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        (self.report)(n, message);
    }
}

pub struct LoggingEmitter;

#[async_trait]
impl ProgressEmitter for LoggingEmitter {
    async fn emit(&self, update_type: &str, message: &str) {
        tracing::info!(update_type, message);
    }
}

/// Bridges to a plain callback; tolerates callbacks that ignore the
/// `update_type` argument.
pub struct CallbackEmitter<F>
where
    F: Fn(&str, &str) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEmitter<F>
where
    F: Fn(&str, &str) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressEmitter for CallbackEmitter<F>
where
    F: Fn(&str, &str) + Send + Sync,
{
    async fn emit(&self, update_type: &str, message: &str) {
        (self.callback)(update_type, message);
    }
}

pub struct NullEmitter;

#[async_trait]
impl ProgressEmitter for NullEmitter {
    async fn emit(&self, _update_type: &str, _message: &str) {}
}

/// Fans out to every child concurrently; one child erroring (panicking
/// inside its own emit) never blocks the others since each emit call is
/// infallible by contract.
pub struct CompositeEmitter {
    children: Vec<Arc<dyn ProgressEmitter>>,
}

impl CompositeEmitter {
    pub fn new(children: Vec<Arc<dyn ProgressEmitter>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl ProgressEmitter for CompositeEmitter {
    async fn emit(&self, update_type: &str, message: &str) {
        let futures = self.children.iter().map(|child| {
            let child = Arc::clone(child);
            let update_type = update_type.to_string();
            let message = message.to_string();
            async move { child.emit(&update_type, &message).await }
        });
        futures::future::join_all(futures).await;
    }
}

/// Builds the composite the task runner actually uses: always persists to
/// the task store and logs, additionally renders to the CLI when requested.
pub fn create_emitter_for_task(store: Arc<TaskStore>, task_id: impl Into<String>, with_cli: bool) -> Arc<dyn ProgressEmitter> {
    let mut children: Vec<Arc<dyn ProgressEmitter>> =
        vec![Arc::new(TaskEmitter::new(store, task_id)), Arc::new(LoggingEmitter)];
    if with_cli {
        children.push(Arc::new(CliEmitter::new()));
    }
    Arc::new(CompositeEmitter::new(children))
}

#[cfg(test)]
mod emitter_tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingEmitter {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ProgressEmitter for RecordingEmitter {
        async fn emit(&self, update_type: &str, message: &str) {
            self.seen.lock().unwrap().push((update_type.to_string(), message.to_string()));
        }
    }

    #[tokio::test]
    async fn composite_fans_out_to_every_child() {
        let a = Arc::new(RecordingEmitter { seen: Mutex::new(Vec::new()) });
        let b = Arc::new(RecordingEmitter { seen: Mutex::new(Vec::new()) });
        let composite = CompositeEmitter::new(vec![a.clone(), b.clone()]);
        composite.emit("progress", "hello").await;
        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mcp_emitter_counts_monotonically() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = calls.clone();
        let emitter = McpEmitter::new(move |n, msg| calls2.lock().unwrap().push((n, msg.to_string())));
        emitter.emit("progress", "first").await;
        emitter.emit("progress", "second").await;
        let seen = calls.lock().unwrap();
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[1].0, 2);
    }

    #[tokio::test]
    async fn null_emitter_never_panics() {
        NullEmitter.emit("anything", "ignored").await;
    }

    #[tokio::test]
    async fn callback_emitter_forwards_both_args() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let emitter = CallbackEmitter::new(move |ut: &str, msg: &str| {
            *seen2.lock().unwrap() = Some((ut.to_string(), msg.to_string()));
        });
        emitter.emit("warning", "careful").await;
        assert_eq!(seen.lock().unwrap().clone(), Some(("warning".to_string(), "careful".to_string())));
    }
}
