//! Semantic memory: embedding provider client and repo-partitioned store.
//!
//! Indexing embeds every chunk of a repository in one batched provider call
//! and persists the rows in one transaction; search embeds the query and
//! compares it against every stored vector in the same `repo_id` partition.
//! Vectors from different repositories never meet in a similarity query.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SEARCH_THRESHOLD;
use crate::errors::IndexError;
use crate::indexer::Chunk;
use crate::store::DbHandle;

/// Fixed dimensionality of the configured embedding model. Vectors of any
/// other length are rejected before they can poison a similarity query.
pub const EMBEDDING_DIM: usize = 768;

const MAX_EMBED_RETRIES: u32 = 3;
const EMBED_BACKOFF_MS: u64 = 500;

/// Provider seam: turn a batch of texts into vectors. One call per batch;
/// a provider error fails the whole batch, there is no partial success.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Provider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Provider(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Provider(format!("invalid embedding response: {}", e)))?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = texts.len(), "embedding batch");

        let mut attempt = 0u32;
        let vectors = loop {
            match self.embed_once(texts).await {
                Ok(vectors) => break vectors,
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_EMBED_RETRIES {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "embedding call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        EMBED_BACKOFF_MS * 2u64.pow(attempt - 1),
                    ))
                    .await;
                }
            }
        };

        if vectors.len() != texts.len() {
            return Err(IndexError::BatchShapeMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        for vector in &vectors {
            if vector.len() != EMBEDDING_DIM {
                return Err(IndexError::DimensionMismatch {
                    expected: EMBEDDING_DIM,
                    got: vector.len(),
                });
            }
        }
        Ok(vectors)
    }
}

/// Cosine similarity between two vectors. Zero vectors compare as 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Persistent semantic memory for one mender process. Shared across
/// concurrent jobs; additive-only and partitioned by `repo_id`, so jobs on
/// different repositories never contend.
#[derive(Clone)]
pub struct EmbeddingStore {
    db: DbHandle,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingStore {
    pub fn new(db: DbHandle, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Embed all chunks in one batch, then persist them in one transaction.
    /// Provider failure aborts before anything is written.
    pub async fn index(&self, repo_id: &str, chunks: &[Chunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let rows: Vec<(String, String, Vec<f32>)> = texts
            .into_iter()
            .zip(vectors)
            .map(|(content, vector)| (repo_id.to_string(), content, vector))
            .collect();
        let count = rows.len();
        self.db
            .call(move |db| db.insert_embeddings(&rows))
            .await
            .map_err(IndexError::Other)?;
        info!(repo_id, count, "indexed embeddings");
        Ok(count)
    }

    /// Remove a repository's partition. Only used when reindexing with
    /// deduplication enabled; the default behaviour is to re-embed and
    /// append.
    pub async fn clear_repo(&self, repo_id: &str) -> Result<usize, IndexError> {
        let repo_id = repo_id.to_string();
        self.db
            .call(move |db| db.clear_repo_embeddings(&repo_id))
            .await
            .map_err(IndexError::Other)
    }

    /// Embed the query and return the content of every record in the
    /// `repo_id` partition whose cosine similarity exceeds `threshold`,
    /// in storage order. No top-k cutoff.
    pub async fn search(
        &self,
        repo_id: &str,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<String>, IndexError> {
        let query_vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Provider("empty embedding for query".into()))?;

        let repo_key = repo_id.to_string();
        let rows = self
            .db
            .call(move |db| db.embeddings_for_repo(&repo_key))
            .await
            .map_err(IndexError::Other)?;

        let results: Vec<String> = rows
            .into_iter()
            .filter(|row| cosine_similarity(&query_vector, &row.vector) > threshold)
            .map(|row| row.content)
            .collect();
        debug!(repo_id, hits = results.len(), "semantic search");
        Ok(results)
    }

    /// Search with the default 0.5 threshold.
    pub async fn search_default(
        &self,
        repo_id: &str,
        query: &str,
    ) -> Result<Vec<String>, IndexError> {
        self.search(repo_id, query, DEFAULT_SEARCH_THRESHOLD).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Deterministic embedder for tests: hashes word tokens into a
    /// fixed-size bag so identical texts embed identically and texts that
    /// share vocabulary land near each other.
    pub struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            Ok(texts.iter().map(|t| word_bag_vector(t)).collect())
        }
    }

    pub fn word_bag_vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: usize = 17;
            for byte in word.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
            }
            vector[hash % EMBEDDING_DIM] += 1.0;
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeEmbedder;
    use super::*;
    use crate::store::{Db, DbHandle};

    fn store() -> EmbeddingStore {
        let db = DbHandle::new(Db::open_in_memory().unwrap());
        EmbeddingStore::new(db, Arc::new(FakeEmbedder))
    }

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            source_path: path.to_string(),
            ordinal: 0,
            text: format!("####### {} #######\n{}", path, text),
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.7, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn round_trip_surfaces_the_original_content() {
        let store = store();
        let chunks = vec![chunk(
            "scraper-util.ts",
            "import pLimit from 'p-limit';\nconst limit = pLimit(4);",
        )];
        store.index("sample_project", &chunks).await.unwrap();

        // The exact stored text embeds to the same vector: similarity 1.0.
        let hits = store
            .search("sample_project", &chunks[0].text, 0.5)
            .await
            .unwrap();
        assert_eq!(hits, vec![chunks[0].text.clone()]);
    }

    #[tokio::test]
    async fn bounded_concurrency_query_finds_the_limiting_import() {
        let store = store();
        let chunks = vec![
            chunk(
                "scraper-util.ts",
                "import pLimit from 'p-limit';\nconst limit = pLimit(4);\nawait Promise.all(tasks.map((t) => limit(() => run(t))));",
            ),
            chunk("readme.md", "yet another cosmetics scraping project"),
        ];
        store.index("sample_project", &chunks).await.unwrap();

        let hits = store
            .search(
                "sample_project",
                "import pLimit from 'p-limit' const limit = pLimit(4) bounded concurrency",
                0.5,
            )
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.contains("p-limit")));
    }

    #[tokio::test]
    async fn search_never_crosses_repo_partitions() {
        let store = store();
        let shared = "fn main() { println!(\"hello\"); }";
        store
            .index("repo-a", &[chunk("main.rs", shared)])
            .await
            .unwrap();
        store
            .index("repo-b", &[chunk("other.rs", "totally unrelated text")])
            .await
            .unwrap();

        // Query repo-b with text stored only under repo-a: no leakage even
        // though the similarity against repo-a's row would be 1.0.
        let hits = store
            .search("repo-b", &format!("####### main.rs #######\n{}", shared), 0.0)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| !h.contains("hello")));
    }

    #[tokio::test]
    async fn indexing_twice_duplicates_rows_by_default() {
        let store = store();
        let chunks = vec![chunk("a.rs", "some content")];
        store.index("repo-x", &chunks).await.unwrap();
        store.index("repo-x", &chunks).await.unwrap();

        let hits = store
            .search("repo-x", &chunks[0].text, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        store.clear_repo("repo-x").await.unwrap();
        let hits = store
            .search("repo-x", &chunks[0].text, 0.5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_chunk_list_is_a_no_op() {
        let store = store();
        assert_eq!(store.index("repo-x", &[]).await.unwrap(), 0);
    }
}
