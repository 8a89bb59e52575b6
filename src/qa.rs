//! Q&A recorder: persists question/answer/citations/feedback as a hash
//! plus membership sets. Embedding generation is deferred to an async
//! background job and never computed inline with the write, mirroring the
//! background-embedding split used for knowledge ingestion.

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keyspace::{self, ENTITY_TTL_SECS};
use crate::models::{Citation, QaFeedback, QaRecord};

pub struct QaRecorder {
    redis: ConnectionManager,
}

impl QaRecorder {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn record(
        &self,
        question: &str,
        answer: &str,
        citations: Vec<Citation>,
        user_id: Option<&str>,
        thread_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<String> {
        let qa_id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let record = QaRecord {
            id: qa_id.clone(),
            question: question.to_string(),
            answer: answer.to_string(),
            citations,
            feedback: None,
            user_id: user_id.map(String::from),
            thread_id: thread_id.map(String::from),
            task_id: task_id.map(String::from),
            created_at: now.clone(),
            updated_at: now,
            embedding: None,
        };

        let mut conn = self.redis.clone();
        let key = keyspace::qa(&qa_id);
        let json = serde_json::to_string(&record)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SET").arg(&key).arg(json).ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(ENTITY_TTL_SECS).ignore();
        if let Some(uid) = user_id {
            pipe.cmd("SADD").arg(keyspace::qa_user_set(uid)).arg(&qa_id).ignore();
        }
        if let Some(tid) = thread_id {
            pipe.cmd("SADD").arg(keyspace::qa_thread_set(tid)).arg(&qa_id).ignore();
        }
        if let Some(kid) = task_id {
            pipe.cmd("SADD").arg(keyspace::qa_task_set(kid)).arg(&qa_id).ignore();
        }
        pipe.query_async(&mut conn).await?;

        Ok(qa_id)
    }

    /// Background job: loads the record, embeds question+answer, and writes
    /// the vector back. Never run inline with `record` so a slow or failing
    /// embedding provider can't delay or invalidate the primary write.
    pub async fn embed_qa_record(&self, llm: &dyn crate::llm::LlmClient, qa_id: &str) -> Result<()> {
        let Some(mut record) = self.get(qa_id).await? else {
            return Ok(());
        };
        let text = format!("{}\n{}", record.question, record.answer);
        let embedding = match llm.embed(&text).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(qa_id, error = %e, "qa embedding failed, primary record left unchanged");
                return Ok(());
            }
        };
        record.embedding = Some(embedding);
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(&record)?;
        let _: () = conn.set(keyspace::qa(qa_id), json).await?;
        Ok(())
    }

    pub async fn get(&self, qa_id: &str) -> Result<Option<QaRecord>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(keyspace::qa(qa_id)).await?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    pub async fn set_feedback(&self, qa_id: &str, feedback: QaFeedback) -> Result<()> {
        let Some(mut record) = self.get(qa_id).await? else {
            return Ok(());
        };
        record.feedback = Some(feedback);
        record.updated_at = chrono::Utc::now().to_rfc3339();
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(&record)?;
        let _: () = conn.set(keyspace::qa(qa_id), json).await?;
        Ok(())
    }

    pub async fn list_for_thread(&self, thread_id: &str) -> Result<Vec<QaRecord>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(keyspace::qa_thread_set(thread_id)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id).await? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod qa_tests {
    use super::*;

    #[test]
    fn qa_record_serializes_without_feedback() {
        let record = QaRecord {
            id: "qa1".into(),
            question: "why oom?".into(),
            answer: "memory pressure".into(),
            citations: vec![],
            feedback: None,
            user_id: Some("u1".into()),
            thread_id: None,
            task_id: None,
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: QaRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.question, "why oom?");
        assert!(back.feedback.is_none());
    }
}
