//! Knowledge retrieval over RediSearch. Talks to the same store through the
//! same raw `redis::cmd(...)` idiom every other module in this crate uses,
//! rather than a second network service for vector search.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::keyspace;
use crate::models::KnowledgeChunk;

const VECTOR_DIM: usize = 1536;
const INDEX_NAME: &str = "sre_knowledge_idx";

/// Metadata filters applied alongside a text or vector query. Each `Some`
/// field is rendered as a TAG clause; `None` leaves that dimension
/// unconstrained.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilters {
    pub category: Option<String>,
    pub source: Option<String>,
    pub severity: Option<String>,
    pub product_label: Option<String>,
}

impl KnowledgeFilters {
    fn to_query_fragment(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(v) = &self.category {
            clauses.push(format!("@category:{{{}}}", escape_tag(v)));
        }
        if let Some(v) = &self.source {
            clauses.push(format!("@source:{{{}}}", escape_tag(v)));
        }
        if let Some(v) = &self.severity {
            clauses.push(format!("@severity:{{{}}}", escape_tag(v)));
        }
        if let Some(v) = &self.product_label {
            clauses.push(format!("@product_labels:{{{}}}", escape_tag(v)));
        }
        clauses.join(" ")
    }
}

fn escape_tag(value: &str) -> String {
    value.chars().map(|c| if "-, {}[]()|".contains(c) { format!("\\{c}") } else { c.to_string() }).collect()
}

pub struct KnowledgeStore {
    redis: ConnectionManager,
}

impl KnowledgeStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Idempotent: `FT.CREATE` errors when the index already exists, which
    /// this treats as success.
    pub async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<String> = redis::cmd("FT.CREATE")
            .arg(INDEX_NAME)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg("sre_knowledge:")
            .arg("SCHEMA")
            .arg("title")
            .arg("TEXT")
            .arg("content")
            .arg("TEXT")
            .arg("source")
            .arg("TAG")
            .arg("category")
            .arg("TAG")
            .arg("severity")
            .arg("TAG")
            .arg("product_labels")
            .arg("TAG")
            .arg("SEPARATOR")
            .arg(",")
            .arg("embedding")
            .arg("VECTOR")
            .arg("FLAT")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(VECTOR_DIM)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("Index already exists") => Ok(()),
            Err(e) => Err(e).context("failed to create knowledge index"),
        }
    }

    pub async fn ingest_chunk(&self, chunk: &KnowledgeChunk, embedding: &[f32]) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = keyspace::knowledge_chunk(&chunk.document_hash, chunk.chunk_index);
        let embedding_bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();

        let fields: Vec<(&str, Vec<u8>)> = vec![
            ("id", chunk.id.as_bytes().to_vec()),
            ("title", chunk.title.as_bytes().to_vec()),
            ("content", chunk.content.as_bytes().to_vec()),
            ("source", chunk.source.as_bytes().to_vec()),
            ("category", chunk.category.as_bytes().to_vec()),
            ("severity", chunk.severity.as_bytes().to_vec()),
            ("document_hash", chunk.document_hash.as_bytes().to_vec()),
            ("chunk_index", chunk.chunk_index.to_string().into_bytes()),
            ("total_chunks", chunk.total_chunks.to_string().into_bytes()),
            ("product_labels", chunk.product_labels.join(",").into_bytes()),
            ("embedding", embedding_bytes),
        ];
        let _: () = conn.hset_multiple(&key, &fields).await?;
        Ok(())
    }

    /// Text search fallback (`FT.SEARCH` without a KNN vector clause). Used
    /// when no embedding provider is configured.
    pub async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        self.search_hybrid(query, &KnowledgeFilters::default(), limit).await
    }

    /// Text search combined with TAG filters over category/source/severity/
    /// product_labels, still without a vector clause.
    pub async fn search_hybrid(&self, query: &str, filters: &KnowledgeFilters, limit: usize) -> Result<Vec<KnowledgeChunk>> {
        let mut conn = self.redis.clone();
        let escaped = escape_query(query);
        let mut clauses = vec![format!("(@content:({escaped})|@title:({escaped}))")];
        let filter_fragment = filters.to_query_fragment();
        if !filter_fragment.is_empty() {
            clauses.push(filter_fragment);
        }
        let raw: redis::Value = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(clauses.join(" "))
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .context("FT.SEARCH failed")?;
        Ok(parse_search_results(raw))
    }

    /// KNN vector search over the embedding field, optionally narrowed by
    /// metadata TAG filters applied as the search's pre-filter. `query_vector`
    /// must be `VECTOR_DIM` float32s (the caller is expected to have produced
    /// it via an embedding provider).
    pub async fn search_vector(
        &self,
        query_vector: &[f32],
        filters: &KnowledgeFilters,
        top_k: usize,
    ) -> Result<Vec<KnowledgeChunk>> {
        anyhow::ensure!(query_vector.len() == VECTOR_DIM, "query vector must be {VECTOR_DIM}-dimensional");
        let mut conn = self.redis.clone();
        let vector_bytes: Vec<u8> = query_vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        let filter_fragment = filters.to_query_fragment();
        let prefilter = if filter_fragment.is_empty() { "*".to_string() } else { filter_fragment };
        let raw: redis::Value = redis::cmd("FT.SEARCH")
            .arg(INDEX_NAME)
            .arg(format!("({prefilter})=>[KNN {top_k} @embedding $vec AS score]"))
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(vector_bytes)
            .arg("SORTBY")
            .arg("score")
            .arg("LIMIT")
            .arg(0)
            .arg(top_k)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .context("FT.SEARCH KNN failed")?;
        Ok(parse_search_results(raw))
    }

    pub async fn get_chunk(&self, document_hash: &str, chunk_index: u32) -> Result<Option<KnowledgeChunk>> {
        let mut conn = self.redis.clone();
        let key = keyspace::knowledge_chunk(document_hash, chunk_index);
        let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(chunk_from_fields(&fields)))
    }

    /// Returns up to `window` chunks before and after the target chunk in
    /// the same document, for "show me the surrounding context" lookups.
    pub async fn related_window(&self, document_hash: &str, chunk_index: u32, window: u32) -> Result<Vec<KnowledgeChunk>> {
        let start = chunk_index.saturating_sub(window);
        let end = chunk_index + window;
        let mut out = Vec::new();
        for idx in start..=end {
            if let Some(mut chunk) = self.get_chunk(document_hash, idx).await? {
                chunk.is_target_chunk = idx == chunk_index;
                out.push(chunk);
            }
        }
        Ok(out)
    }
}

pub fn document_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn escape_query(query: &str) -> String {
    query.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect()
}

fn chunk_from_fields(fields: &std::collections::HashMap<String, String>) -> KnowledgeChunk {
    KnowledgeChunk {
        id: fields.get("id").cloned().unwrap_or_default(),
        title: fields.get("title").cloned().unwrap_or_default(),
        content: fields.get("content").cloned().unwrap_or_default(),
        source: fields.get("source").cloned().unwrap_or_default(),
        category: fields.get("category").cloned().unwrap_or_default(),
        severity: fields.get("severity").cloned().unwrap_or_default(),
        document_hash: fields.get("document_hash").cloned().unwrap_or_default(),
        chunk_index: fields.get("chunk_index").and_then(|s| s.parse().ok()).unwrap_or(0),
        total_chunks: fields.get("total_chunks").and_then(|s| s.parse().ok()).unwrap_or(1),
        product_labels: fields
            .get("product_labels")
            .map(|s| s.split(',').filter(|l| !l.is_empty()).map(String::from).collect())
            .unwrap_or_default(),
        score: None,
        is_target_chunk: false,
    }
}

fn parse_search_results(raw: redis::Value) -> Vec<KnowledgeChunk> {
    let redis::Value::Bulk(items) = raw else { return Vec::new() };
    let mut out = Vec::new();
    // FT.SEARCH reply shape: [total, key1, fields1, key2, fields2, ...]
    let mut i = 1;
    while i + 1 < items.len() {
        if let redis::Value::Bulk(field_pairs) = &items[i + 1] {
            let mut fields = std::collections::HashMap::new();
            let mut j = 0;
            while j + 1 < field_pairs.len() {
                if let (redis::Value::Data(k), redis::Value::Data(v)) = (&field_pairs[j], &field_pairs[j + 1]) {
                    fields.insert(String::from_utf8_lossy(k).to_string(), String::from_utf8_lossy(v).to_string());
                }
                j += 2;
            }
            if !fields.is_empty() {
                out.push(chunk_from_fields(&fields));
            }
        }
        i += 2;
    }
    out
}

#[cfg(test)]
mod knowledge_tests {
    use super::*;

    #[test]
    fn document_hash_is_stable_and_content_sensitive() {
        let a = document_hash("hello world");
        let b = document_hash("hello world");
        let c = document_hash("hello world!");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn escape_query_strips_search_operators() {
        assert_eq!(escape_query("memory|usage*"), "memoryusage");
    }

    #[test]
    fn chunk_from_fields_defaults_missing_numeric_fields() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("id".to_string(), "x".to_string());
        let chunk = chunk_from_fields(&fields);
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!(chunk.total_chunks, 1);
        assert!(chunk.product_labels.is_empty());
    }

    #[test]
    fn chunk_from_fields_splits_product_labels() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("product_labels".to_string(), "enterprise,cloud".to_string());
        let chunk = chunk_from_fields(&fields);
        assert_eq!(chunk.product_labels, vec!["enterprise".to_string(), "cloud".to_string()]);
    }

    #[test]
    fn filters_render_only_the_set_fields() {
        let filters = KnowledgeFilters { category: Some("memory".to_string()), ..Default::default() };
        assert_eq!(filters.to_query_fragment(), "@category:{memory}");
        assert_eq!(KnowledgeFilters::default().to_query_fragment(), "");
    }
}
