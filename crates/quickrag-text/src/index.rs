use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use quickrag_core::config::Bm25Settings;
use quickrag_core::tokenize::normalize;
use quickrag_core::traits::SparseRetriever;
use quickrag_core::types::{DocumentChunk, Origin, RetrievalResult};
use quickrag_core::Result;

use crate::bm25::{self, Bm25Params, CorpusStats};
use crate::cache::ResultCache;
use crate::snapshot::{Snapshot, SNAPSHOT_FORMAT};

/// One immutable view of the corpus. Mutations build a fresh state and
/// swap it in; readers holding the old `Arc` keep a consistent view.
#[derive(Debug, Default)]
struct IndexState {
    generation: u64,
    documents: Vec<DocumentChunk>,
    tokenized: Vec<Vec<String>>,
    stats: CorpusStats,
    version: String,
}

impl IndexState {
    fn build(generation: u64, documents: Vec<DocumentChunk>, tokenized: Vec<Vec<String>>, stats: Option<CorpusStats>) -> Self {
        let stats = match stats {
            Some(s) if s.matches_corpus(documents.len()) => s,
            _ => CorpusStats::build(&tokenized),
        };
        let version = corpus_version(&documents);
        Self { generation, documents, tokenized, stats, version }
    }
}

fn corpus_version(documents: &[DocumentChunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    for d in documents {
        hasher.update(d.content_hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SparseStats {
    pub documents: usize,
    pub terms: usize,
    pub avg_doc_len: f32,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate_percent: f64,
    pub cache_size: usize,
    pub version: String,
}

/// In-memory BM25 index over document chunks, persisted to an optional
/// JSON snapshot after every mutation.
pub struct SparseIndex {
    params: Bm25Params,
    snapshot_path: Option<PathBuf>,
    state: RwLock<Arc<IndexState>>,
    writer: Mutex<()>,
    cache: Mutex<ResultCache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SparseIndex {
    pub fn new(params: Bm25Params, result_cache_entries: usize) -> Self {
        Self {
            params,
            snapshot_path: None,
            state: RwLock::new(Arc::new(IndexState::build(0, Vec::new(), Vec::new(), None))),
            writer: Mutex::new(()),
            cache: Mutex::new(ResultCache::new(result_cache_entries)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &Bm25Settings) -> Self {
        let index = Self::new(Bm25Params::from(settings), settings.result_cache_entries);
        match &settings.snapshot_path {
            Some(p) => index.with_snapshot(quickrag_core::config::expand_path(p)),
            None => index,
        }
    }

    /// Attach a snapshot file and load it. A missing file means an empty
    /// index; an unreadable one is logged and also means an empty index.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Snapshot::load(&path) {
            Ok(Some(snap)) => {
                let had_stats = snap.stats.is_some();
                let state = IndexState::build(1, snap.documents, snap.tokenized, snap.stats);
                info!(path = %path.display(), documents = state.documents.len(), had_stats, "loaded sparse snapshot");
                self.install(state);
            }
            Ok(None) => debug!(path = %path.display(), "no sparse snapshot yet"),
            Err(e) => warn!(path = %path.display(), error = %e, "discarding unreadable sparse snapshot"),
        }
        self.snapshot_path = Some(path);
        self
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn len(&self) -> usize {
        self.current().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SparseStats {
        let state = self.current();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let cache_size = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        SparseStats {
            documents: state.documents.len(),
            terms: state.stats.term_count(),
            avg_doc_len: state.stats.avg_doc_len,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate_percent: if total == 0 { 0.0 } else { (hits as f64 / total as f64 * 1000.0).round() / 10.0 },
            cache_size,
            version: state.version.clone(),
        }
    }

    fn current(&self) -> Arc<IndexState> {
        match self.state.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, state: IndexState) {
        let generation = state.generation;
        let state = Arc::new(state);
        match self.state.write() {
            Ok(mut g) => *g = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        if let Ok(mut c) = self.cache.lock() {
            c.reset(generation);
        }
    }

    fn persist(&self, state: &IndexState) {
        let Some(path) = &self.snapshot_path else { return };
        let snap = Snapshot {
            format: SNAPSHOT_FORMAT,
            documents: state.documents.clone(),
            tokenized: state.tokenized.clone(),
            stats: Some(state.stats.clone()),
        };
        if let Err(e) = snap.save(path) {
            warn!(path = %path.display(), error = %e, "failed to write sparse snapshot");
        }
    }

    /// Replace the current state and persist it. Caller holds the writer lock.
    fn commit(&self, documents: Vec<DocumentChunk>, tokenized: Vec<Vec<String>>) {
        let generation = self.current().generation + 1;
        let state = IndexState::build(generation, documents, tokenized, None);
        self.persist(&state);
        self.install(state);
    }
}

impl SparseRetriever for SparseIndex {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let state = self.current();
        if state.documents.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let tokens = normalize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let key = ResultCache::key(&tokens, top_k);
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(state.generation, &key)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        let results: Vec<RetrievalResult> = bm25::score(&state.stats, &self.params, &tokens)
            .into_iter()
            .take(top_k)
            .map(|(ordinal, score)| RetrievalResult::from_chunk(&state.documents[ordinal], score, Origin::Sparse))
            .collect();
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut c) = self.cache.lock() {
            c.insert(state.generation, key, results.clone());
        }
        Ok(results)
    }

    fn add(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = self.current();
        let mut seen: HashSet<&str> = state.documents.iter().map(|d| d.content_hash.as_str()).collect();
        let fresh: Vec<&DocumentChunk> = chunks.iter().filter(|c| seen.insert(c.content_hash.as_str())).collect();
        if fresh.is_empty() {
            debug!(offered = chunks.len(), "sparse add: all chunks already indexed");
            return Ok(());
        }
        let mut documents = state.documents.clone();
        let mut tokenized = state.tokenized.clone();
        for c in &fresh {
            tokenized.push(normalize(&c.content));
            documents.push((*c).clone());
        }
        info!(added = fresh.len(), skipped = chunks.len() - fresh.len(), total = documents.len(), "sparse index rebuilt");
        self.commit(documents, tokenized);
        Ok(())
    }

    fn delete(&self, doc_ids: &[String]) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = self.current();
        let doomed: HashSet<&str> = doc_ids.iter().map(String::as_str).collect();
        let documents: Vec<DocumentChunk> =
            state.documents.iter().filter(|d| !doomed.contains(d.doc_id.as_str())).cloned().collect();
        if documents.len() == state.documents.len() {
            return Ok(());
        }
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| normalize(&d.content)).collect();
        info!(removed = state.documents.len() - documents.len(), total = documents.len(), "sparse index rebuilt");
        self.commit(documents, tokenized);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let generation = self.current().generation + 1;
        self.install(IndexState::build(generation, Vec::new(), Vec::new(), None));
        if let Some(path) = &self.snapshot_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("sparse index cleared");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.current().documents.is_empty()
    }

    fn version(&self) -> String {
        self.current().version.clone()
    }

    fn stats_json(&self) -> serde_json::Value {
        serde_json::to_value(self.stats()).unwrap_or_default()
    }
}
