//! Tool definitions and result caching, keyed by (instance scope, tool
//! name, argument fingerprint) via a SHA256 digest of the sorted argument
//! map.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ResultEnvelope, ToolStatus};

/// Invokes a tool's concrete side effect (an admin/REST/CLI call against the
/// scoped Redis instance, a support-package inspection, …) and returns its
/// raw JSON result. Adapters are registered by the caller that knows how to
/// reach the target instance; this crate supplies only the dispatch.
pub type ToolAdapter = Arc<dyn Fn(&str, &serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value> + Send + Sync>;

/// Special scope meaning "applies across every instance", used for tools
/// whose result doesn't depend on which Redis instance is in play (e.g. a
/// pure documentation lookup).
pub const ALL_INSTANCES_SCOPE: &str = "__all__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments, forwarded verbatim to the LLM
    /// tool-call contract.
    pub parameters_schema: serde_json::Value,
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: i64,
}

fn default_cache_ttl() -> i64 {
    300
}

pub fn fingerprint_args(args: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut hasher = Sha256::new();
    let mut keys: Vec<&String> = args.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(args[key].to_string().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

fn cache_key(scope: &str, tool_name: &str, fingerprint: &str) -> String {
    format!("sre:toolcache:{scope}:{tool_name}:{fingerprint}")
}

pub struct ToolManager {
    redis: ConnectionManager,
    definitions: HashMap<String, ToolDefinition>,
    adapters: HashMap<String, ToolAdapter>,
}

impl ToolManager {
    pub fn new(redis: ConnectionManager, definitions: Vec<ToolDefinition>, adapters: HashMap<String, ToolAdapter>) -> Self {
        let definitions = definitions.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self { redis, definitions, adapters }
    }

    pub fn get_definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get(name)
    }

    pub fn list_definitions(&self) -> Vec<&ToolDefinition> {
        self.definitions.values().collect()
    }

    /// Runs one tool call end to end: cache lookup, adapter dispatch on
    /// miss, then cache the result when the tool is cacheable and the call
    /// succeeded. An unknown tool or a tool with no registered adapter comes
    /// back as an error envelope rather than panicking or silently no-oping,
    /// so the plan stage always gets something to reason about.
    pub async fn execute(&self, scope: &str, tool_name: &str, args: serde_json::Map<String, serde_json::Value>) -> ResultEnvelope {
        if let Ok(Some(cached)) = self.get_cached(scope, tool_name, &args).await {
            return cached;
        }

        let Some(def) = self.definitions.get(tool_name) else {
            return build_envelope(tool_name, tool_name, args, ToolStatus::Error, serde_json::json!({"error": "unknown tool"}));
        };

        let envelope = match self.adapters.get(tool_name) {
            Some(adapter) => match adapter(scope, &args) {
                Ok(data) => build_envelope(tool_name, &def.name, args.clone(), ToolStatus::Success, data),
                Err(e) => build_envelope(
                    tool_name,
                    &def.name,
                    args.clone(),
                    ToolStatus::Error,
                    serde_json::json!({"error": e.to_string()}),
                ),
            },
            None => build_envelope(
                tool_name,
                &def.name,
                args.clone(),
                ToolStatus::Error,
                serde_json::json!({"error": "no adapter registered for this tool"}),
            ),
        };

        if envelope.status == ToolStatus::Success {
            if let Err(e) = self.put_cached(scope, tool_name, &envelope).await {
                tracing::warn!(tool_name, error = %e, "failed to cache tool result");
            }
        }
        envelope
    }

    /// Looks up a cached result for `tool_name` under `scope`, falling back
    /// to the all-instances scope when the tool is marked cacheable but no
    /// instance-specific entry exists.
    pub async fn get_cached(
        &self,
        scope: &str,
        tool_name: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<ResultEnvelope>> {
        let Some(def) = self.definitions.get(tool_name) else { return Ok(None) };
        if !def.cacheable {
            return Ok(None);
        }
        let fingerprint = fingerprint_args(args);
        let mut conn = self.redis.clone();

        for candidate_scope in [scope, ALL_INSTANCES_SCOPE] {
            let key = cache_key(candidate_scope, tool_name, &fingerprint);
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                if let Ok(envelope) = serde_json::from_str::<ResultEnvelope>(&raw) {
                    return Ok(Some(envelope));
                }
            }
        }
        Ok(None)
    }

    pub async fn put_cached(&self, scope: &str, tool_name: &str, envelope: &ResultEnvelope) -> Result<()> {
        let Some(def) = self.definitions.get(tool_name) else { return Ok(()) };
        if !def.cacheable {
            return Ok(());
        }
        let fingerprint = fingerprint_args(&envelope.args);
        let key = cache_key(scope, tool_name, &fingerprint);
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(envelope)?;
        let _: () = conn.set_ex(&key, json, def.cache_ttl_secs.max(1) as u64).await.context("failed to cache tool result")?;
        Ok(())
    }

    pub async fn clear_cache(&self, scope: Option<&str>) -> Result<u64> {
        let mut conn = self.redis.clone();
        let pattern = match scope {
            Some(s) => format!("sre:toolcache:{s}:*"),
            None => "sre:toolcache:*".to_string(),
        };
        let keys: Vec<String> = conn.keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = conn.del(&keys).await?;
        Ok(deleted)
    }
}

pub fn build_envelope(
    tool_key: &str,
    name: &str,
    args: serde_json::Map<String, serde_json::Value>,
    status: ToolStatus,
    data: serde_json::Value,
) -> ResultEnvelope {
    ResultEnvelope {
        tool_key: tool_key.to_string(),
        name: name.to_string(),
        description: None,
        args,
        status,
        data,
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
    }
}

#[cfg(test)]
mod tool_tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_independent() {
        let mut a = serde_json::Map::new();
        a.insert("b".to_string(), serde_json::json!(2));
        a.insert("a".to_string(), serde_json::json!(1));

        let mut b = serde_json::Map::new();
        b.insert("a".to_string(), serde_json::json!(1));
        b.insert("b".to_string(), serde_json::json!(2));

        assert_eq!(fingerprint_args(&a), fingerprint_args(&b));
    }

    #[test]
    fn fingerprint_differs_on_value_change() {
        let mut a = serde_json::Map::new();
        a.insert("x".to_string(), serde_json::json!(1));
        let mut b = serde_json::Map::new();
        b.insert("x".to_string(), serde_json::json!(2));
        assert_ne!(fingerprint_args(&a), fingerprint_args(&b));
    }

    #[test]
    fn cache_key_scopes_by_instance_and_tool() {
        let k1 = cache_key("instance-a", "get_memory_info", "abc");
        let k2 = cache_key("instance-b", "get_memory_info", "abc");
        assert_ne!(k1, k2);
        assert!(k1.contains("get_memory_info"));
    }

    #[test]
    fn build_envelope_stamps_a_timestamp() {
        let envelope = build_envelope("get_info", "get_info", serde_json::Map::new(), ToolStatus::Success, serde_json::json!({}));
        assert!(envelope.timestamp.is_some());
    }
}
