//! Centralized Redis key derivation. Pure functions, no I/O.
//!
//! Field names and the `sre:`/`sre_*` prefix split are fixed: this is the
//! stable wire format other tooling reads directly.

pub const ENTITY_TTL_SECS: i64 = 86_400;

pub fn thread_status(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:status")
}
pub fn thread_updates(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:updates")
}
pub fn thread_context(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:context")
}
pub fn thread_action_items(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:action_items")
}
pub fn thread_metadata(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:metadata")
}
pub fn thread_result(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:result")
}
pub fn thread_error(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:error")
}
pub fn thread_messages(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:messages")
}

pub fn threads_index() -> String {
    "sre:threads:index".to_string()
}
pub fn threads_user_index(user_id: &str) -> String {
    format!("sre:threads:user:{user_id}")
}
pub fn thread_search_doc(thread_id: &str) -> String {
    format!("sre_threads:{thread_id}")
}

/// Keys that must share the thread's TTL and be removed together on delete.
pub fn all_thread_keys(thread_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("status", thread_status(thread_id)),
        ("updates", thread_updates(thread_id)),
        ("context", thread_context(thread_id)),
        ("action_items", thread_action_items(thread_id)),
        ("metadata", thread_metadata(thread_id)),
        ("result", thread_result(thread_id)),
        ("error", thread_error(thread_id)),
        ("messages", thread_messages(thread_id)),
    ]
}

pub fn task_status(task_id: &str) -> String {
    format!("sre:task:{task_id}:status")
}
pub fn task_updates(task_id: &str) -> String {
    format!("sre:task:{task_id}:updates")
}
pub fn task_result(task_id: &str) -> String {
    format!("sre:task:{task_id}:result")
}
pub fn task_error(task_id: &str) -> String {
    format!("sre:task:{task_id}:error")
}
pub fn task_metadata(task_id: &str) -> String {
    format!("sre:task:{task_id}:metadata")
}
pub fn thread_tasks_index(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:tasks")
}

pub fn all_task_keys(task_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("status", task_status(task_id)),
        ("updates", task_updates(task_id)),
        ("result", task_result(task_id)),
        ("error", task_error(task_id)),
        ("metadata", task_metadata(task_id)),
    ]
}

/// Per-task Redis Stream, keyed by `task_id` rather than `thread_id`. See
/// DESIGN.md for why.
pub fn task_stream(task_id: &str) -> String {
    format!("sre:stream:task:{task_id}")
}

pub fn knowledge_document(doc_id: &str) -> String {
    format!("sre_knowledge:{doc_id}")
}
pub fn knowledge_chunk(document_hash: &str, chunk_index: u32) -> String {
    format!("sre_knowledge:{document_hash}:chunk:{chunk_index}")
}
pub fn knowledge_chunk_pattern(document_hash: &str) -> String {
    format!("sre_knowledge:{document_hash}:chunk:*")
}
pub fn knowledge_documents_index() -> String {
    "sre_knowledge_idx".to_string()
}

pub fn instances_legacy_list() -> String {
    "sre:instances".to_string()
}
pub fn instance(instance_id: &str) -> String {
    format!("sre_instances:{instance_id}")
}

pub fn qa(qa_id: &str) -> String {
    format!("sre:qa:{qa_id}")
}
pub fn qa_thread_set(thread_id: &str) -> String {
    format!("sre:thread:{thread_id}:qa")
}
pub fn qa_user_set(user_id: &str) -> String {
    format!("sre:user:{user_id}:qa")
}
pub fn qa_task_set(task_id: &str) -> String {
    format!("sre:task:{task_id}:qa")
}

#[cfg(test)]
mod keyspace_tests {
    use super::*;

    #[test]
    fn thread_keys_share_the_stable_prefix() {
        assert_eq!(thread_status("abc"), "sre:thread:abc:status");
        assert_eq!(thread_messages("abc"), "sre:thread:abc:messages");
        assert_eq!(thread_search_doc("abc"), "sre_threads:abc");
    }

    #[test]
    fn task_stream_is_keyed_by_task_id() {
        assert_eq!(task_stream("task-1"), "sre:stream:task:task-1");
    }

    #[test]
    fn all_thread_keys_covers_every_named_suffix() {
        let keys = all_thread_keys("t1");
        let names: Vec<&str> = keys.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["status", "updates", "context", "action_items", "metadata", "result", "error", "messages"]
        );
    }

    #[test]
    fn qa_sets_are_per_thread_user_and_task() {
        assert_eq!(qa_thread_set("t1"), "sre:thread:t1:qa");
        assert_eq!(qa_user_set("u1"), "sre:user:u1:qa");
        assert_eq!(qa_task_set("k1"), "sre:task:k1:qa");
    }
}
