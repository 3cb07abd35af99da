//! Hybrid retrieval orchestrator.
//!
//! One request: process the query, consult the `retrieval` cache, run the
//! sparse and dense paths concurrently, fuse, write back. Sub-retrieval
//! failures degrade to empty lists; only configuration errors reach the
//! caller.
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use quickrag_cache::{derive_key, CacheTier, Namespace, NamespaceStats};
use quickrag_core::config::{RetrievalSettings, Settings};
use quickrag_core::traits::{EmbedProvider, SparseRetriever, VectorIndex};
use quickrag_core::types::{DocumentChunk, FusionMethod, HybridRetrievalResult, RetrievalResult};
use quickrag_core::{Error, Result};

use crate::fusion::FusionEngine;
use crate::hot::{AccessLog, HotQuery};
use crate::monitor::PerformanceMonitor;
use crate::query::{ProcessedQuery, QueryProcessor, QueryStats};

/// Cache hit rate is only reported once the namespace has seen this many lookups.
const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 20;

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStatus {
    pub sparse_ready: bool,
    pub dense_ready: bool,
    pub hybrid_ready: bool,
    pub index_version: String,
    pub default_fusion: FusionMethod,
    pub sparse: serde_json::Value,
    pub retrieval_cache: NamespaceStats,
    pub query_processor: QueryStats,
}

pub struct HybridRetriever {
    sparse: Arc<dyn SparseRetriever>,
    dense: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbedProvider>,
    cache: Arc<CacheTier>,
    processor: QueryProcessor,
    access: AccessLog,
    fusion: FusionEngine,
    default_method: FusionMethod,
    limits: RetrievalSettings,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl HybridRetriever {
    pub fn new(
        sparse: Arc<dyn SparseRetriever>,
        dense: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbedProvider>,
        cache: Arc<CacheTier>,
        settings: &Settings,
    ) -> Self {
        Self {
            sparse,
            dense,
            embedder,
            cache,
            processor: QueryProcessor::default(),
            access: AccessLog::default(),
            fusion: FusionEngine::from(&settings.fusion),
            default_method: settings.fusion.default_method,
            limits: settings.retrieval.clone(),
            monitor: None,
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn processor(&self) -> &QueryProcessor {
        &self.processor
    }

    pub fn cache(&self) -> &Arc<CacheTier> {
        &self.cache
    }

    pub fn default_method(&self) -> FusionMethod {
        self.default_method
    }

    pub fn default_top_k(&self) -> usize {
        self.limits.default_top_k
    }

    /// Retrieve with the configured default `top_k` and fusion method.
    pub async fn retrieve_default(&self, query: &str) -> Result<HybridRetrievalResult> {
        self.retrieve(query, self.limits.default_top_k, self.default_method).await
    }

    pub async fn retrieve(&self, query: &str, top_k: usize, method: FusionMethod) -> Result<HybridRetrievalResult> {
        self.run(query, top_k, method, true).await
    }

    /// Same as `retrieve` but leaves the access log alone, so warming does
    /// not make its own variants look popular.
    pub(crate) async fn prefetch(&self, query: &str, top_k: usize, method: FusionMethod) -> Result<HybridRetrievalResult> {
        self.run(query, top_k, method, false).await
    }

    /// Most frequently retrieved queries (normalized text), hottest first.
    pub fn hot_queries(&self, limit: usize) -> Vec<HotQuery> {
        self.access.hot(limit)
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access
    }

    async fn run(&self, query: &str, top_k: usize, method: FusionMethod, track: bool) -> Result<HybridRetrievalResult> {
        let started = Instant::now();
        if let Some(m) = &self.monitor {
            m.begin_request();
        }
        let outcome = self.retrieve_inner(query, top_k, method, track, started).await;
        if let Some(m) = &self.monitor {
            m.end_request(outcome.is_ok(), elapsed_ms(started));
            self.report_cache_rate(m);
        }
        outcome
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        top_k: usize,
        method: FusionMethod,
        track: bool,
        started: Instant,
    ) -> Result<HybridRetrievalResult> {
        if top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be at least 1".into()));
        }
        let top_k = top_k.min(self.limits.max_top_k);
        let processed = self.processor.process(query);
        if track {
            self.access.record(&processed.normalized);
        }
        let optimized = self.processor.optimize_for_retrieval(&processed);
        let index_version = self.sparse.version();
        let top_k_part = top_k.to_string();
        let key = derive_key(
            "retrieval",
            &[optimized.as_str(), top_k_part.as_str(), method.as_str(), index_version.as_str()],
        );

        if let Some(mut cached) = self.cache.get_json::<HybridRetrievalResult>(Namespace::Retrieval, &key).await {
            cached.debug.cache_hit = true;
            cached.debug.sparse_error = None;
            cached.debug.dense_error = None;
            cached.debug.parallel_retrieval_ms = 0.0;
            cached.debug.total_ms = elapsed_ms(started);
            debug!(%key, results = cached.results.len(), "retrieval cache hit");
            return Ok(cached);
        }

        let retrieval_started = Instant::now();
        let (dense, sparse) = tokio::join!(self.dense_search(&optimized, top_k), async {
            self.sparse.retrieve(&optimized, top_k)
        });
        let parallel_ms = elapsed_ms(retrieval_started);

        let (sparse, sparse_error) = settle("sparse", sparse);
        let (dense, dense_error) = settle("dense", dense);
        let degraded = sparse_error.is_some() || dense_error.is_some();

        let mut fused = self.fusion.fuse_method(&sparse, &dense, method)?;
        fused.results.truncate(top_k);
        fused.debug.fused_count = fused.results.len();
        fused.debug.parallel_retrieval_ms = parallel_ms;
        fused.debug.query_type = Some(processed.query_type.to_string());
        fused.debug.optimized_query = Some(optimized);
        fused.debug.index_version = Some(index_version);
        fused.debug.sparse_error = sparse_error;
        fused.debug.dense_error = dense_error;
        fused.debug.total_ms = elapsed_ms(started);

        // A partial result would mask the failed path's recovery for a whole TTL.
        if degraded {
            debug!(%key, "degraded retrieval result not cached");
        } else if !self.cache.set_json(Namespace::Retrieval, &key, &fused, None).await {
            debug!(%key, "retrieval result not fully cached");
        }
        if let Some(m) = &self.monitor {
            m.record_retrieval_latency(parallel_ms, "hybrid");
        }
        Ok(fused)
    }

    async fn dense_search(&self, text: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let embedding = self
            .embedder
            .embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Backend("embedder returned no vector for the query".into()))?;
        self.dense.retrieve(&embedding, top_k).await
    }

    fn report_cache_rate(&self, monitor: &PerformanceMonitor) {
        let stats = self.retrieval_cache_stats();
        if stats.lookups() >= MIN_LOOKUPS_FOR_HIT_RATE {
            monitor.record_cache_stats(Namespace::Retrieval.as_str(), stats.overall_hit_rate, stats.l1_entries);
        }
    }

    fn retrieval_cache_stats(&self) -> NamespaceStats {
        self.cache.stats().remove(&Namespace::Retrieval).unwrap_or_default()
    }

    /// Process a query the same way `retrieve` does, without searching.
    pub fn analyze(&self, query: &str) -> (ProcessedQuery, String) {
        let processed = self.processor.process(query);
        let optimized = self.processor.optimize_for_retrieval(&processed);
        (processed, optimized)
    }

    /// Run a sparse mutation on the blocking pool. Mutations rebuild the
    /// index and rewrite its snapshot, which must not hold an async worker.
    async fn mutate_sparse<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&dyn SparseRetriever) -> Result<()> + Send + 'static,
    {
        let sparse = Arc::clone(&self.sparse);
        tokio::task::spawn_blocking(move || op(sparse.as_ref()))
            .await
            .map_err(|e| Error::Backend(format!("sparse mutation task failed: {e}")))?
    }

    pub async fn add_documents(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let owned = chunks.to_vec();
        let (sparse, dense) = tokio::join!(self.mutate_sparse(move |s| s.add(&owned)), self.dense.add(chunks));
        sparse?;
        dense?;
        info!(chunks = chunks.len(), version = %self.sparse.version(), "documents added");
        Ok(())
    }

    pub async fn delete_documents(&self, doc_ids: &[String]) -> Result<()> {
        let owned = doc_ids.to_vec();
        let (sparse, dense) = tokio::join!(self.mutate_sparse(move |s| s.delete(&owned)), self.dense.delete(doc_ids));
        sparse?;
        dense?;
        info!(docs = doc_ids.len(), "documents deleted");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let (sparse, dense) = tokio::join!(self.mutate_sparse(|s| s.clear()), self.dense.clear());
        sparse?;
        dense?;
        info!("indexes cleared");
        Ok(())
    }

    /// Ready only when both indexes hold documents.
    pub async fn is_ready(&self) -> bool {
        self.sparse.is_ready() && self.dense.is_ready().await
    }

    pub async fn ensure_ready(&self) -> Result<()> {
        let sparse = self.sparse.is_ready();
        let dense = self.dense.is_ready().await;
        match (sparse, dense) {
            (true, true) => Ok(()),
            (false, true) => Err(Error::NotReady("sparse index is empty".into())),
            (true, false) => Err(Error::NotReady("vector index is empty or unreachable".into())),
            (false, false) => Err(Error::NotReady("both indexes are empty".into())),
        }
    }

    pub async fn status(&self) -> RetrieverStatus {
        let sparse_ready = self.sparse.is_ready();
        let dense_ready = self.dense.is_ready().await;
        RetrieverStatus {
            sparse_ready,
            dense_ready,
            hybrid_ready: sparse_ready && dense_ready,
            index_version: self.sparse.version(),
            default_fusion: self.default_method,
            sparse: self.sparse.stats_json(),
            retrieval_cache: self.retrieval_cache_stats(),
            query_processor: self.processor.stats(),
        }
    }
}

/// Unwrap a sub-retrieval outcome, turning an error into an empty list and
/// keeping its text for the debug record.
fn settle(path: &str, outcome: Result<Vec<RetrievalResult>>) -> (Vec<RetrievalResult>, Option<String>) {
    match outcome {
        Ok(results) => (results, None),
        Err(e) => {
            warn!(path, error = %e, "sub-retrieval failed; continuing without it");
            (Vec::new(), Some(e.to_string()))
        }
    }
}
