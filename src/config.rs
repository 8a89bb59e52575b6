use crate::error::AgentError;

/// Process-wide configuration, loaded once at startup from the environment.
///
/// Optional values fall back to sane defaults via `std::env::var(...)
/// .unwrap_or_else(...)`; required values fail fast with a descriptive error
/// instead of panicking deep in a request path.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub master_key_b64: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub tracing_endpoint: Option<String>,
    pub task_redelivery_timeout_secs: u64,
    pub worker_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AgentError> {
        let _ = dotenvy::dotenv();

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let master_key_b64 = std::env::var("REDIS_SRE_MASTER_KEY")
            .map_err(|_| AgentError::Config("REDIS_SRE_MASTER_KEY environment variable not set".to_string()))?;

        let llm_model = std::env::var("SRE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let embedding_model =
            std::env::var("SRE_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let tracing_endpoint = std::env::var("SRE_TRACING_ENDPOINT").ok();

        let task_redelivery_timeout_secs = std::env::var("SRE_TASK_REDELIVERY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let worker_concurrency = std::env::var("SRE_WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Ok(Self {
            redis_url,
            master_key_b64,
            llm_model,
            embedding_model,
            tracing_endpoint,
            task_redelivery_timeout_secs,
            worker_concurrency,
        })
    }
}
