//! Narrow LLM/embedding provider contract the rest of the crate programs
//! against, plus a generic HTTP-backed implementation and a scripted test
//! double. Concrete provider wiring (model selection, streaming, retries
//! beyond what's here) stays out of this module's concern.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AgentError;

/// Deserializes a structured-output call result into `T`. Kept as a free
/// function (rather than a generic trait method) so `LlmClient` stays
/// object-safe and can be shared as `Arc<dyn LlmClient>`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    serde_json::from_str(raw).map_err(|e| AgentError::LlmStructural(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Tool-call ids this assistant message declared, if any.
    pub tool_call_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_call_ids: Vec<String>,
}

/// Narrow async boundary the rest of the crate programs against so the
/// concrete LLM/embedding provider stays swappable and test-doubleable.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, AgentError>;

    /// Forces a structured JSON response, mirroring the original's
    /// `with_structured_output(Model)` call shape. Callers deserialize the
    /// raw JSON via [`parse_structured`]; kept non-generic here so the
    /// trait remains object-safe.
    async fn structured_raw(&self, messages: &[ChatMessage], schema_name: &str) -> Result<String, AgentError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

/// Generic HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), model: model.into() }
    }

    fn to_wire(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({ "model": self.model, "messages": Self::to_wire(messages) });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::Transient(format!("llm http status {}", resp.status())));
        }
        let json: Value = resp.json().await.map_err(|e| AgentError::Transient(e.to_string()))?;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
        Ok(ChatResponse { content, tool_call_ids: Vec::new() })
    }

    async fn structured_raw(&self, messages: &[ChatMessage], _schema_name: &str) -> Result<String, AgentError> {
        let resp = self.chat(messages).await?;
        Ok(resp.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;
        let json: Value = resp.json().await.map_err(|e| AgentError::Transient(e.to_string()))?;
        let values = json["data"][0]["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();
        Ok(values)
    }
}

/// Scripted test double: returns queued responses in order, records calls.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeLlmClient {
    pub responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    pub calls: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeLlmClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, AgentError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Transient("no scripted response left".to_string()))?;
        Ok(ChatResponse { content, tool_call_ids: Vec::new() })
    }

    async fn structured_raw(&self, messages: &[ChatMessage], _schema_name: &str) -> Result<String, AgentError> {
        let resp = self.chat(messages).await?;
        Ok(resp.content)
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AgentError> {
        Ok(vec![0.0; 1536])
    }
}

#[cfg(test)]
mod fake_llm_tests {
    use super::*;

    #[tokio::test]
    async fn fake_client_returns_scripted_responses_in_order() {
        let fake = FakeLlmClient::new(vec!["first", "second"]);
        let msgs = vec![ChatMessage { role: ChatRole::User, content: "hi".into(), tool_call_ids: vec![] }];
        let r1 = fake.chat(&msgs).await.unwrap();
        let r2 = fake.chat(&msgs).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test]
    async fn fake_client_errors_when_exhausted() {
        let fake = FakeLlmClient::new(vec![]);
        let msgs = vec![ChatMessage { role: ChatRole::User, content: "hi".into(), tool_call_ids: vec![] }];
        assert!(fake.chat(&msgs).await.is_err());
    }
}
