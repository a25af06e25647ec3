//! Read-only semantic search over an external vector index.
//!
//! The core treats the embedding service and nearest-neighbour index as
//! opaque: it sends text, gets a vector back, and hands that vector to
//! pgvector for ranking. Failures here are non-fatal to workers — they
//! proceed without knowledge — but are always logged.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};

use crate::config::KnowledgeConfig;

/// One retrieved passage and its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeLookup: Send + Sync {
    async fn search(&self, query_text: &str, k: usize) -> Vec<KnowledgeHit>;
}

/// Embeds `query_text` via a remote embedding endpoint, then ranks the
/// `knowledge_chunks` table by pgvector cosine distance.
pub struct VectorKnowledgeLookup {
    http: reqwest::Client,
    pool: Pool,
    config: KnowledgeConfig,
}

impl VectorKnowledgeLookup {
    pub fn new(pool: Pool, config: KnowledgeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            pool,
            config,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        #[derive(Serialize)]
        struct Request<'a> {
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Response {
            embedding: Vec<f32>,
        }

        let response = self
            .http
            .post(&self.config.embedding_endpoint)
            .json(&Request { input: text })
            .send()
            .await
            .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?
            .json::<Response>()
            .await
            .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?;

        Ok(response.embedding)
    }

    async fn query(&self, vector: Vec<f32>, k: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| KnowledgeError::BackendUnavailable(e.to_string()))?;

        let embedding = pgvector::Vector::from(vector);
        let limit = k as i64;

        let rows = conn
            .query(
                r#"
                SELECT content, 1 - (embedding <=> $1) AS score
                FROM knowledge_chunks
                WHERE index_id = $2
                ORDER BY embedding <=> $1
                LIMIT $3
                "#,
                &[&embedding, &self.config.index_id, &limit],
            )
            .await
            .map_err(|e| KnowledgeError::BackendUnavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| KnowledgeHit {
                text: row.get("content"),
                score: row.get::<_, f64>("score") as f32,
            })
            .collect())
    }
}

#[async_trait]
impl KnowledgeLookup for VectorKnowledgeLookup {
    async fn search(&self, query_text: &str, k: usize) -> Vec<KnowledgeHit> {
        let k = if k == 0 { self.config.default_k } else { k };

        match self.embed(query_text).await {
            Ok(vector) => match self.query(vector, k).await {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(error = %err, "knowledge lookup query failed, proceeding without knowledge");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "knowledge lookup embedding failed, proceeding without knowledge");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum KnowledgeError {
    #[error("embedding request failed: {0}")]
    EmbeddingFailed(String),
    #[error("knowledge backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyLookup;

    #[async_trait]
    impl KnowledgeLookup for EmptyLookup {
        async fn search(&self, _query_text: &str, _k: usize) -> Vec<KnowledgeHit> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn a_failing_lookup_returns_empty_not_an_error() {
        let lookup = EmptyLookup;
        let hits = lookup.search("retirement planning", 5).await;
        assert!(hits.is_empty());
    }
}
