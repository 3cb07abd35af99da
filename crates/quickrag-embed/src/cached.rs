use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use quickrag_cache::{derive_key, CacheTier, Namespace};
use quickrag_core::traits::EmbedProvider;
use quickrag_core::{Error, Result};

const PRECOMPUTE_BATCH: usize = 25;

/// Write-through embedding cache in front of any provider. Lookups go
/// through the `embeddings` namespace keyed by `(embedder_id, text)` with
/// the text taken byte for byte; providers may be case-sensitive.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbedProvider>,
    cache: Arc<CacheTier>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbedProvider>, cache: Arc<CacheTier>) -> Self {
        Self { inner, cache, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    fn key(&self, text: &str) -> String {
        derive_key("emb", &[self.inner.embedder_id(), text])
    }

    /// Embed and cache any of `texts` not already cached. Returns how many
    /// new vectors were stored.
    pub async fn precompute(&self, texts: &[String]) -> usize {
        let mut unique: Vec<String> = texts.to_vec();
        unique.sort();
        unique.dedup();
        let keys: Vec<String> = unique.iter().map(|t| self.key(t)).collect();
        let cached = self.cache.get_many(Namespace::Embeddings, &keys).await;
        let todo: Vec<String> =
            unique.into_iter().zip(&keys).filter(|(_, k)| !cached.contains_key(*k)).map(|(t, _)| t).collect();

        let mut stored = 0;
        for batch in todo.chunks(PRECOMPUTE_BATCH) {
            match self.inner.embed_batch(batch).await {
                Ok(vectors) => {
                    let entries = batch.iter().zip(vectors).map(|(t, v)| (self.key(t), encode(&v))).collect();
                    stored += self.cache.set_many(Namespace::Embeddings, entries, None).await;
                }
                Err(e) => debug!(error = %e, batch = batch.len(), "precompute batch failed"),
            }
        }
        info!(requested = texts.len(), stored, "embeddings precomputed");
        stored
    }

    pub fn hit_rate(&self) -> f64 {
        let h = self.hits.load(Ordering::Relaxed);
        let total = h + self.misses.load(Ordering::Relaxed);
        if total == 0 { 0.0 } else { h as f64 / total as f64 }
    }
}

#[async_trait]
impl EmbedProvider for CachedEmbedder {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.key(t)).collect();
        let cached = self.cache.get_many(Namespace::Embeddings, &keys).await;
        let dim = self.inner.dim();

        let mut out: Vec<Option<Vec<f32>>> =
            keys.iter().map(|k| cached.get(k).and_then(|b| decode(b, dim))).collect();
        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        self.hits.fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(Error::Backend(format!("provider returned {} vectors for {} texts", fresh.len(), batch.len())));
            }
            let entries = missing.iter().zip(&fresh).map(|(&i, v)| (keys[i].clone(), encode(v))).collect();
            self.cache.set_many(Namespace::Embeddings, entries, None).await;
            for (i, v) in missing.into_iter().zip(fresh) {
                out[i] = Some(v);
            }
        }
        Ok(out.into_iter().flatten().collect())
    }
}

fn encode(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode(bytes: &[u8], dim: usize) -> Option<Vec<f32>> {
    if bytes.len() != dim * 4 {
        return None;
    }
    Some(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}
