use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use quickrag_core::traits::{EmbedProvider, VectorIndex};
use quickrag_core::types::{DocumentChunk, Origin, RetrievalResult};
use quickrag_core::{Error, Result};

/// Brute-force cosine index held in memory. Suitable for small corpora and
/// for running without a LanceDB directory.
pub struct MemoryVectorIndex {
    embedder: Arc<dyn EmbedProvider>,
    rows: RwLock<Vec<(DocumentChunk, Vec<f32>)>>,
}

impl MemoryVectorIndex {
    pub fn new(embedder: Arc<dyn EmbedProvider>) -> Self {
        Self { embedder, rows: RwLock::new(Vec::new()) }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn retrieve(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        let rows = self.rows.read().await;
        let mut scored: Vec<(usize, f32)> =
            rows.iter().enumerate().map(|(i, (_, v))| (i, cosine(query_embedding, v))).filter(|(_, s)| *s > 0.0).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, s)| RetrievalResult::from_chunk(&rows[i].0, s, Origin::Dense))
            .collect())
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Backend(format!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len())));
        }
        let mut rows = self.rows.write().await;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            match rows.iter_mut().find(|(c, _)| c.chunk_id == chunk.chunk_id) {
                Some(row) => *row = (chunk.clone(), vector),
                None => rows.push((chunk.clone(), vector)),
            }
        }
        Ok(())
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = doc_ids.iter().map(String::as_str).collect();
        self.rows.write().await.retain(|(c, _)| !doomed.contains(c.doc_id.as_str()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.rows.write().await.clear();
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        !self.rows.read().await.is_empty()
    }
}
