use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quickrag_cache::CacheTier;
use quickrag_core::clock::{ManualClock, SharedClock};
use quickrag_core::config::Settings;
use quickrag_core::traits::{EmbedProvider, SparseRetriever, VectorIndex};
use quickrag_core::types::{DocumentChunk, FusionMethod, Origin, RetrievalResult};
use quickrag_core::{Error, Result};
use quickrag_embed::HashEmbedder;
use quickrag_hybrid::{AnswerCache, CacheWarmer, Engine, HybridRetriever, PerformanceMonitor};
use quickrag_text::SparseIndex;
use quickrag_vector::MemoryVectorIndex;

fn hit(id: &str, score: f32, origin: Origin) -> RetrievalResult {
    RetrievalResult {
        doc_id: format!("doc-{id}"),
        chunk_id: id.to_string(),
        source: "fake".into(),
        title: String::new(),
        content: format!("content of {id}"),
        score,
        origin,
        metadata: Default::default(),
    }
}

/// Sparse side that returns a fixed list or fails, counting calls.
struct ScriptedSparse {
    results: Vec<RetrievalResult>,
    fail: bool,
    calls: AtomicUsize,
    last_top_k: Mutex<Option<usize>>,
    version: Mutex<String>,
}

impl ScriptedSparse {
    fn returning(n: usize) -> Self {
        Self {
            results: (0..n).map(|i| hit(&format!("s{i}"), (n - i) as f32, Origin::Sparse)).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
            last_top_k: Mutex::new(None),
            version: Mutex::new("v1".into()),
        }
    }

    fn failing() -> Self {
        Self { fail: true, ..Self::returning(0) }
    }
}

impl SparseRetriever for ScriptedSparse {
    fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_top_k.lock().unwrap() = Some(top_k);
        if self.fail {
            return Err(Error::Backend("sparse down".into()));
        }
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
    fn add(&self, _chunks: &[DocumentChunk]) -> Result<()> {
        Ok(())
    }
    fn delete(&self, _doc_ids: &[String]) -> Result<()> {
        Ok(())
    }
    fn clear(&self) -> Result<()> {
        Ok(())
    }
    fn is_ready(&self) -> bool {
        !self.results.is_empty()
    }
    fn version(&self) -> String {
        self.version.lock().unwrap().clone()
    }
}

/// Dense side that returns a fixed list or fails.
struct ScriptedDense {
    results: Vec<RetrievalResult>,
    fail: bool,
}

impl ScriptedDense {
    fn failing() -> Self {
        Self { results: Vec::new(), fail: true }
    }

    fn returning(ids: &[&str]) -> Self {
        let n = ids.len();
        Self {
            results: ids.iter().enumerate().map(|(i, id)| hit(id, 1.0 - i as f32 / (n as f32 + 1.0), Origin::Dense)).collect(),
            fail: false,
        }
    }
}

#[async_trait]
impl VectorIndex for ScriptedDense {
    async fn retrieve(&self, _query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        if self.fail {
            return Err(Error::Backend("vector index unreachable".into()));
        }
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
    async fn add(&self, _chunks: &[DocumentChunk]) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _doc_ids: &[String]) -> Result<()> {
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn is_ready(&self) -> bool {
        !self.fail
    }
}

/// Dense side whose outage can be switched off mid-test.
struct FlakyDense {
    down: AtomicBool,
    results: Vec<RetrievalResult>,
}

#[async_trait]
impl VectorIndex for FlakyDense {
    async fn retrieve(&self, _query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Backend("vector index unreachable".into()));
        }
        Ok(self.results.iter().take(top_k).cloned().collect())
    }
    async fn add(&self, _chunks: &[DocumentChunk]) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _doc_ids: &[String]) -> Result<()> {
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn is_ready(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

const MUTATION_DELAY: Duration = Duration::from_millis(300);

/// Sparse side whose mutations block the calling thread.
struct BlockingSparse;

impl SparseRetriever for BlockingSparse {
    fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievalResult>> {
        Ok(Vec::new())
    }
    fn add(&self, _chunks: &[DocumentChunk]) -> Result<()> {
        std::thread::sleep(MUTATION_DELAY);
        Ok(())
    }
    fn delete(&self, _doc_ids: &[String]) -> Result<()> {
        std::thread::sleep(MUTATION_DELAY);
        Ok(())
    }
    fn clear(&self) -> Result<()> {
        std::thread::sleep(MUTATION_DELAY);
        Ok(())
    }
    fn is_ready(&self) -> bool {
        false
    }
    fn version(&self) -> String {
        "v0".into()
    }
}

/// Dense side whose mutations wait on a timer.
struct SleepyDense;

#[async_trait]
impl VectorIndex for SleepyDense {
    async fn retrieve(&self, _query_embedding: &[f32], _top_k: usize) -> Result<Vec<RetrievalResult>> {
        Ok(Vec::new())
    }
    async fn add(&self, _chunks: &[DocumentChunk]) -> Result<()> {
        tokio::time::sleep(MUTATION_DELAY).await;
        Ok(())
    }
    async fn delete(&self, _doc_ids: &[String]) -> Result<()> {
        tokio::time::sleep(MUTATION_DELAY).await;
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        tokio::time::sleep(MUTATION_DELAY).await;
        Ok(())
    }
    async fn is_ready(&self) -> bool {
        false
    }
}

fn clock() -> SharedClock {
    Arc::new(ManualClock::new(1_700_000_000_000))
}

fn embedder() -> Arc<dyn EmbedProvider> {
    Arc::new(HashEmbedder::new(64))
}

fn retriever(sparse: Arc<dyn SparseRetriever>, dense: Arc<dyn VectorIndex>) -> HybridRetriever {
    let settings = Settings::default();
    let cache = Arc::new(CacheTier::local_only(&settings.cache, clock()));
    HybridRetriever::new(sparse, dense, embedder(), cache, &settings)
}

fn chunk(doc: &str, id: &str, content: &str) -> DocumentChunk {
    DocumentChunk::new(doc, id, format!("{doc}.md"), doc, content, 0)
}

fn vacation_chunks() -> Vec<DocumentChunk> {
    vec![
        chunk("handbook", "a", "vacation policy allows 20 days"),
        chunk("security", "b", "security requires MFA"),
    ]
}

#[tokio::test]
async fn dense_failure_degrades_to_sparse_only() {
    let r = retriever(Arc::new(ScriptedSparse::returning(5)), Arc::new(ScriptedDense::failing()));
    let out = r.retrieve("anything at all", 10, FusionMethod::Rrf).await.unwrap();
    assert_eq!(out.debug.dense_count, 0);
    assert_eq!(out.debug.sparse_count, 5);
    assert_eq!(out.results.len(), 5);
    assert!(out.results.iter().all(|res| res.chunk_id.starts_with('s')));
    assert!(out.debug.dense_error.as_deref().unwrap().contains("unreachable"));
    assert!(out.debug.sparse_error.is_none());
    assert!(!out.debug.cache_hit);
}

#[tokio::test]
async fn sparse_failure_degrades_to_dense_only() {
    let r = retriever(Arc::new(ScriptedSparse::failing()), Arc::new(ScriptedDense::returning(&["x", "y"])));
    let out = r.retrieve("anything", 10, FusionMethod::Weighted).await.unwrap();
    assert_eq!(out.chunk_ids(), vec!["x", "y"]);
    assert_eq!(out.debug.sparse_count, 0);
    assert!(out.debug.sparse_error.is_some());
}

#[tokio::test]
async fn both_paths_failing_is_an_empty_success() {
    let r = retriever(Arc::new(ScriptedSparse::failing()), Arc::new(ScriptedDense::failing()));
    let out = r.retrieve("anything", 3, FusionMethod::Rrf).await.unwrap();
    assert!(out.results.is_empty());
    assert_eq!(out.debug.fused_count, 0);
}

#[tokio::test]
async fn zero_top_k_is_a_config_error() {
    let r = retriever(Arc::new(ScriptedSparse::returning(2)), Arc::new(ScriptedDense::returning(&[])));
    let err = r.retrieve("anything", 0, FusionMethod::Rrf).await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn top_k_is_clamped_and_fused_list_truncated() {
    let sparse = Arc::new(ScriptedSparse::returning(80));
    let r = retriever(sparse.clone(), Arc::new(ScriptedDense::returning(&["x", "y", "z"])));
    let out = r.retrieve("anything", 500, FusionMethod::Rrf).await.unwrap();
    assert_eq!(*sparse.last_top_k.lock().unwrap(), Some(50));
    assert_eq!(out.results.len(), 50);
    let out = r.retrieve("anything", 4, FusionMethod::Rrf).await.unwrap();
    assert_eq!(out.results.len(), 4);
    assert_eq!(out.debug.fused_count, 4);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let sparse = Arc::new(ScriptedSparse::returning(3));
    let r = retriever(sparse.clone(), Arc::new(ScriptedDense::returning(&["s0"])));
    let first = r.retrieve("Vacation days?", 5, FusionMethod::Rrf).await.unwrap();
    let second = r.retrieve("vacation days", 5, FusionMethod::Rrf).await.unwrap();
    assert!(!first.debug.cache_hit);
    assert!(second.debug.cache_hit);
    assert_eq!(first.chunk_ids(), second.chunk_ids());
    assert_eq!(sparse.calls.load(Ordering::SeqCst), 1);

    // other method or top_k is a different key
    let third = r.retrieve("vacation days", 5, FusionMethod::Weighted).await.unwrap();
    assert!(!third.debug.cache_hit);
    assert_eq!(third.fusion_method, FusionMethod::Weighted);
}

#[tokio::test]
async fn index_version_change_invalidates_cached_results() {
    let sparse = Arc::new(ScriptedSparse::returning(3));
    let r = retriever(sparse.clone(), Arc::new(ScriptedDense::returning(&[])));
    r.retrieve("vacation", 5, FusionMethod::Rrf).await.unwrap();
    *sparse.version.lock().unwrap() = "v2".into();
    let out = r.retrieve("vacation", 5, FusionMethod::Rrf).await.unwrap();
    assert!(!out.debug.cache_hit);
    assert_eq!(out.debug.index_version.as_deref(), Some("v2"));
    assert_eq!(sparse.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn end_to_end_vacation_example_without_dense_results() {
    let sparse = Arc::new(SparseIndex::new(Default::default(), 200));
    let dense = Arc::new(ScriptedDense::returning(&[]));
    let r = retriever(sparse.clone(), dense);
    r.add_documents(&vacation_chunks()).await.unwrap();
    let out = r.retrieve("vacation days", 2, FusionMethod::Rrf).await.unwrap();
    assert_eq!(out.results[0].chunk_id, "a");
    assert_eq!(out.debug.dense_count, 0);
    assert_eq!(out.results[0].origin, Origin::Hybrid);
}

#[tokio::test]
async fn end_to_end_vacation_example_with_memory_vectors() {
    let sparse = Arc::new(SparseIndex::new(Default::default(), 200));
    let dense = Arc::new(MemoryVectorIndex::new(embedder()));
    let r = retriever(sparse.clone(), dense.clone());
    r.add_documents(&vacation_chunks()).await.unwrap();
    assert!(r.is_ready().await);
    let out = r.retrieve("vacation days", 2, FusionMethod::Rrf).await.unwrap();
    assert_eq!(out.results[0].chunk_id, "a");
    assert!(out.debug.dense_count >= 1);
    assert_eq!(out.debug.query_type.as_deref(), Some("general"));

    r.delete_documents(&["handbook".to_string()]).await.unwrap();
    assert_eq!(sparse.len(), 1);
    assert_eq!(dense.len().await, 1);
    let out = r.retrieve("vacation days", 2, FusionMethod::Rrf).await.unwrap();
    assert!(!out.debug.cache_hit, "delete changes the index version");
    assert!(out.results.iter().all(|res| res.chunk_id != "a"));

    r.clear().await.unwrap();
    assert!(!r.is_ready().await);
    assert!(matches!(r.ensure_ready().await, Err(Error::NotReady(_))));
}

#[tokio::test]
async fn readiness_requires_both_indexes() {
    let r = retriever(Arc::new(ScriptedSparse::returning(1)), Arc::new(ScriptedDense::failing()));
    assert!(!r.is_ready().await);
    let err = r.ensure_ready().await.unwrap_err();
    assert!(err.to_string().contains("vector"));
    let status = r.status().await;
    assert!(status.sparse_ready && !status.dense_ready && !status.hybrid_ready);
    assert_eq!(status.index_version, "v1");
}

#[tokio::test]
async fn monitor_sees_every_request() {
    let settings = Settings::default();
    let monitor = Arc::new(PerformanceMonitor::new(&settings.monitor, clock()));
    let r = retriever(Arc::new(ScriptedSparse::returning(2)), Arc::new(ScriptedDense::returning(&["s1"])))
        .with_monitor(monitor.clone());
    r.retrieve("first", 5, FusionMethod::Rrf).await.unwrap();
    r.retrieve("first", 5, FusionMethod::Rrf).await.unwrap();
    r.retrieve("x", 0, FusionMethod::Rrf).await.unwrap_err();
    let stats = monitor.stats();
    assert_eq!((stats.requests.total, stats.requests.succeeded, stats.requests.failed), (3, 2, 1));
    assert_eq!(stats.metrics["query_latency_ms"].count, 3);
    // only the cache miss measured a retrieval
    assert_eq!(stats.metrics["retrieval_latency_ms"].count, 1);
}

#[tokio::test]
async fn warming_makes_the_raw_query_a_cache_hit() {
    let sparse = Arc::new(SparseIndex::new(Default::default(), 200));
    let r = Arc::new(retriever(sparse, Arc::new(ScriptedDense::returning(&[]))));
    r.add_documents(&vacation_chunks()).await.unwrap();
    let warmer = CacheWarmer::new(r.clone()).with_top_k(5);
    let report = warmer.warm(&["What is the vacation policy?".to_string()]).await;
    assert!(report.variants >= 1 && report.variants <= 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.warmed + report.empty, report.variants);
    let out = r.retrieve("What is the vacation policy?", 5, FusionMethod::Rrf).await.unwrap();
    assert!(out.debug.cache_hit);
}

#[tokio::test]
async fn answers_are_cached_per_query_and_context_order() {
    let settings = Settings::default();
    let answers = AnswerCache::new(Arc::new(CacheTier::local_only(&settings.cache, clock())));
    let ctx = vec![hit("a", 1.0, Origin::Hybrid), hit("b", 0.5, Origin::Hybrid)];
    let generated = AtomicUsize::new(0);
    let counter = &generated;
    let generate = move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("Twenty days.".to_string())
    };
    assert_eq!(answers.get_or_generate("vacation?", &ctx, generate).await.unwrap(), "Twenty days.");
    assert_eq!(answers.get_or_generate("vacation?", &ctx, generate).await.unwrap(), "Twenty days.");
    assert_eq!(generated.load(Ordering::SeqCst), 1);

    let reversed: Vec<_> = ctx.iter().rev().cloned().collect();
    assert_ne!(AnswerCache::key("vacation?", &ctx), AnswerCache::key("vacation?", &reversed));
    assert!(answers.get("vacation?", &reversed).await.is_none());
    let cached = answers.get("vacation?", &ctx).await.unwrap();
    assert_eq!(cached.chunk_ids, vec!["a", "b"]);
}

#[tokio::test]
async fn failed_generation_is_not_cached() {
    let settings = Settings::default();
    let answers = AnswerCache::new(Arc::new(CacheTier::local_only(&settings.cache, clock())));
    let out = answers.get_or_generate("q", &[], || async { Err(Error::Backend("llm down".into())) }).await;
    assert!(out.is_err());
    assert!(answers.get("q", &[]).await.is_none());
}

#[tokio::test]
async fn engine_wires_in_memory_backends_by_default() {
    let engine = Engine::from_settings(Settings::default(), clock()).await.unwrap();
    engine.retriever.add_documents(&vacation_chunks()).await.unwrap();
    let out = engine.retriever.retrieve_default("vacation days").await.unwrap();
    assert_eq!(out.results[0].chunk_id, "a");
    assert_eq!(engine.sparse.len(), 2);
    assert_eq!(engine.monitor.counters().total, 1);
    let status = engine.retriever.status().await;
    assert!(status.hybrid_ready);
    assert_eq!(status.sparse["documents"], 2);
}

#[tokio::test]
async fn index_mutations_run_both_sides_concurrently() {
    let r = retriever(Arc::new(BlockingSparse), Arc::new(SleepyDense));
    let bound = MUTATION_DELAY + MUTATION_DELAY / 2;

    let started = Instant::now();
    r.add_documents(&vacation_chunks()).await.unwrap();
    assert!(started.elapsed() < bound, "add took {:?}", started.elapsed());

    let started = Instant::now();
    r.delete_documents(&["handbook".to_string()]).await.unwrap();
    assert!(started.elapsed() < bound, "delete took {:?}", started.elapsed());

    let started = Instant::now();
    r.clear().await.unwrap();
    assert!(started.elapsed() < bound, "clear took {:?}", started.elapsed());
}

#[tokio::test]
async fn degraded_result_is_not_cached_and_recovery_shows_up() {
    let dense = Arc::new(FlakyDense { down: AtomicBool::new(true), results: vec![hit("d0", 0.9, Origin::Dense)] });
    let r = retriever(Arc::new(ScriptedSparse::returning(2)), dense.clone());

    let degraded = r.retrieve("vacation", 5, FusionMethod::Rrf).await.unwrap();
    assert!(degraded.debug.dense_error.is_some());

    dense.down.store(false, Ordering::SeqCst);
    let recovered = r.retrieve("vacation", 5, FusionMethod::Rrf).await.unwrap();
    assert!(!recovered.debug.cache_hit);
    assert!(recovered.debug.dense_error.is_none());
    assert_eq!(recovered.debug.dense_count, 1);
    assert!(recovered.chunk_ids().contains(&"d0"));

    let cached = r.retrieve("vacation", 5, FusionMethod::Rrf).await.unwrap();
    assert!(cached.debug.cache_hit);
    assert!(cached.debug.dense_error.is_none() && cached.debug.sparse_error.is_none());
}

#[tokio::test]
async fn hot_queries_rank_by_access_count() {
    let r = retriever(Arc::new(ScriptedSparse::returning(2)), Arc::new(ScriptedDense::returning(&["s0"])));
    for q in ["rain barrel", "Solar panels?", "solar panels", "compost", "solar panels", "rain barrel"] {
        r.retrieve(q, 5, FusionMethod::Rrf).await.unwrap();
    }
    let hot = r.hot_queries(2);
    let names: Vec<&str> = hot.iter().map(|h| h.query.as_str()).collect();
    assert_eq!(names, vec!["solar panels", "rain barrel"]);
    assert_eq!(hot[0].count, 3);
    assert_eq!(hot[1].count, 2);
}

#[tokio::test]
async fn warming_hot_queries_leaves_counts_alone() {
    let sparse = Arc::new(SparseIndex::new(Default::default(), 200));
    let r = Arc::new(retriever(sparse, Arc::new(ScriptedDense::returning(&[]))));
    r.add_documents(&vacation_chunks()).await.unwrap();
    r.retrieve("vacation policy", 5, FusionMethod::Rrf).await.unwrap();
    r.retrieve("vacation policy", 5, FusionMethod::Rrf).await.unwrap();
    r.retrieve("security", 5, FusionMethod::Rrf).await.unwrap();
    let before = r.hot_queries(10);

    let report = CacheWarmer::new(r.clone()).with_top_k(5).warm_hot(1).await;
    assert_eq!(report.queries, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(r.hot_queries(10), before);
}
