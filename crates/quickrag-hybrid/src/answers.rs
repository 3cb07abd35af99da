//! Generated-answer cache in the `answers` namespace.
//!
//! An answer is valid for one query over one ordered context, so the key
//! covers the raw query and the chunk ids in the order they were given to
//! the generator.
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use quickrag_cache::{derive_key, CacheTier, Namespace};
use quickrag_core::types::RetrievalResult;
use quickrag_core::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub chunk_ids: Vec<String>,
}

pub struct AnswerCache {
    cache: Arc<CacheTier>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnswerCache {
    pub fn new(cache: Arc<CacheTier>) -> Self {
        Self { cache, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn key(query: &str, context: &[RetrievalResult]) -> String {
        let parts: Vec<&str> = std::iter::once(query).chain(context.iter().map(|r| r.chunk_id.as_str())).collect();
        derive_key("answer", &parts)
    }

    pub async fn get(&self, query: &str, context: &[RetrievalResult]) -> Option<CachedAnswer> {
        let found = self.cache.get_json::<CachedAnswer>(Namespace::Answers, &Self::key(query, context)).await;
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn put(&self, query: &str, context: &[RetrievalResult], answer: &str) -> bool {
        let value = CachedAnswer {
            answer: answer.to_string(),
            chunk_ids: context.iter().map(|r| r.chunk_id.clone()).collect(),
        };
        self.cache.set_json(Namespace::Answers, &Self::key(query, context), &value, None).await
    }

    /// Cached answer, or run `generate` and cache what it returns. A failed
    /// generation is returned to the caller and nothing is stored.
    pub async fn get_or_generate<F, Fut>(&self, query: &str, context: &[RetrievalResult], generate: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(hit) = self.get(query, context).await {
            return Ok(hit.answer);
        }
        let answer = generate().await?;
        if !self.put(query, context, &answer).await {
            debug!(query, "answer not fully cached");
        }
        Ok(answer)
    }

    pub fn hit_rate(&self) -> f64 {
        let h = self.hits.load(Ordering::Relaxed);
        let total = h + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            h as f64 / total as f64
        }
    }
}
