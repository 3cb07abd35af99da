//! quickrag-hybrid
//!
//! Hybrid retrieval: query processing, concurrent sparse/dense fan-out,
//! rank fusion, result caching and performance monitoring.
pub mod answers;
pub mod engine;
pub mod fusion;
pub mod hot;
pub mod monitor;
pub mod query;
pub mod retriever;
pub mod warm;

pub use answers::{AnswerCache, CachedAnswer};
pub use engine::Engine;
pub use fusion::{fuse, FusionEngine};
pub use hot::{AccessLog, HotQuery};
pub use monitor::{Alert, AlertLevel, Health, HealthStatus, MonitorStats, PerformanceMonitor, Threshold};
pub use query::{ProcessedQuery, QueryProcessor, QueryType};
pub use retriever::{HybridRetriever, RetrieverStatus};
pub use warm::{CacheWarmer, WarmReport};
