//! Wiring of the concrete backends from [`Settings`].
use std::sync::Arc;
use tracing::{info, warn};

use quickrag_cache::{CacheTier, LanceStore, RemoteStore};
use quickrag_core::clock::SharedClock;
use quickrag_core::config::{expand_path, Settings};
use quickrag_core::traits::{EmbedProvider, SparseRetriever, VectorIndex};
use quickrag_core::Result;
use quickrag_embed::{get_default_embedder, CachedEmbedder};
use quickrag_text::SparseIndex;
use quickrag_vector::{LanceVectorIndex, MemoryVectorIndex};

use crate::answers::AnswerCache;
use crate::monitor::PerformanceMonitor;
use crate::retriever::HybridRetriever;

const CACHE_TABLE: &str = "cache_entries";

/// Every long-lived service of one deployment, built once at startup.
pub struct Engine {
    pub settings: Settings,
    pub sparse: Arc<SparseIndex>,
    pub cache: Arc<CacheTier>,
    pub embedder: Arc<CachedEmbedder>,
    pub monitor: Arc<PerformanceMonitor>,
    pub retriever: Arc<HybridRetriever>,
    pub answers: AnswerCache,
}

impl Engine {
    pub async fn from_settings(settings: Settings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        let remote = open_remote(&settings).await;
        let cache = Arc::new(CacheTier::new(&settings.cache, remote, clock.clone()));

        let embedder = Arc::new(CachedEmbedder::new(get_default_embedder(settings.vector.dim), cache.clone()));
        let shared_embedder: Arc<dyn EmbedProvider> = embedder.clone();
        let dense: Arc<dyn VectorIndex> = match LanceVectorIndex::from_settings(&settings.vector, shared_embedder.clone()).await? {
            Some(index) => Arc::new(index),
            None => {
                info!("no vector uri configured; using in-memory vector index");
                Arc::new(MemoryVectorIndex::new(shared_embedder.clone()))
            }
        };

        let sparse = Arc::new(SparseIndex::from_settings(&settings.bm25));
        let sparse_dyn: Arc<dyn SparseRetriever> = sparse.clone();
        let monitor = Arc::new(PerformanceMonitor::new(&settings.monitor, clock));
        let retriever = Arc::new(
            HybridRetriever::new(sparse_dyn, dense, shared_embedder, cache.clone(), &settings).with_monitor(monitor.clone()),
        );
        let answers = AnswerCache::new(cache.clone());
        Ok(Self { settings, sparse, cache, embedder, monitor, retriever, answers })
    }
}

/// The shared tier is optional; failing to open it leaves the cache local.
async fn open_remote(settings: &Settings) -> Option<Arc<dyn RemoteStore>> {
    let uri = expand_path(settings.cache.remote.uri.as_ref()?);
    match LanceStore::open(&uri.to_string_lossy(), CACHE_TABLE).await {
        Ok(store) => {
            info!(uri = %uri.display(), "shared cache tier opened");
            let store: Arc<dyn RemoteStore> = Arc::new(store);
            Some(store)
        }
        Err(e) => {
            warn!(uri = %uri.display(), error = %e, "shared cache tier unavailable; continuing with L1 only");
            None
        }
    }
}
