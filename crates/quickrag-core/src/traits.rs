use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentChunk, RetrievalResult};

/// Lexical retrieval over an in-process index. Scoring never suspends, so
/// the surface is synchronous.
pub trait SparseRetriever: Send + Sync {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>>;
    fn add(&self, chunks: &[DocumentChunk]) -> Result<()>;
    fn delete(&self, doc_ids: &[String]) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn is_ready(&self) -> bool;
    /// Fingerprint of the indexed corpus; changes whenever the corpus does.
    fn version(&self) -> String;
    /// Engine-specific counters for status pages.
    fn stats_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Dense retrieval capability. Implementations may be remote, slow or
/// flaky; callers treat every error as an empty result.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn retrieve(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>>;
    async fn add(&self, chunks: &[DocumentChunk]) -> Result<()>;
    async fn delete(&self, doc_ids: &[String]) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn is_ready(&self) -> bool;
}

/// Embedding model or service.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:xxh64:d384`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality.
    fn dim(&self) -> usize;
    /// Compute embeddings for a batch of input texts, one vector per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
