//! Cache warming from a list of popular queries.
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use quickrag_core::types::FusionMethod;

use crate::retriever::HybridRetriever;

const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmReport {
    pub queries: usize,
    pub variants: usize,
    pub warmed: usize,
    pub empty: usize,
    pub failed: usize,
    pub elapsed_ms: f64,
}

/// Runs every distinct variant of each popular query through the retriever
/// so the `retrieval` and `embeddings` namespaces are populated.
pub struct CacheWarmer {
    retriever: Arc<HybridRetriever>,
    top_k: usize,
    method: FusionMethod,
    concurrency: usize,
}

impl CacheWarmer {
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        let top_k = retriever.default_top_k();
        let method = retriever.default_method();
        Self { retriever, top_k, method, concurrency: DEFAULT_CONCURRENCY }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: FusionMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Variants of all queries, first occurrence kept.
    pub fn plan(&self, queries: &[String]) -> Vec<String> {
        let processor = self.retriever.processor();
        let mut seen = HashSet::new();
        queries
            .iter()
            .flat_map(|q| processor.variants(&processor.process(q)))
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Warm the `limit` most retrieved queries seen so far.
    pub async fn warm_hot(&self, limit: usize) -> WarmReport {
        let queries: Vec<String> = self.retriever.hot_queries(limit).into_iter().map(|h| h.query).collect();
        self.warm(&queries).await
    }

    pub async fn warm(&self, queries: &[String]) -> WarmReport {
        let started = Instant::now();
        let plan = self.plan(queries);
        let outcomes: Vec<_> = stream::iter(plan.iter())
            .map(|variant| async move { (variant, self.retriever.prefetch(variant, self.top_k, self.method).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = WarmReport { queries: queries.len(), variants: plan.len(), ..WarmReport::default() };
        for (variant, outcome) in outcomes {
            match outcome {
                Ok(r) if r.results.is_empty() => report.empty += 1,
                Ok(_) => report.warmed += 1,
                Err(e) => {
                    warn!(variant = %variant, error = %e, "warming query failed");
                    report.failed += 1;
                }
            }
        }
        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            queries = report.queries,
            variants = report.variants,
            warmed = report.warmed,
            failed = report.failed,
            "cache warmed"
        );
        report
    }
}
