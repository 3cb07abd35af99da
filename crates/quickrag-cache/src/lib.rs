//! quickrag-cache
//!
//! Two-level cache shared by retrieval results, embeddings and generated
//! answers. L1 is a moka map per namespace, L2 any [`RemoteStore`]
//! ([`MemoryStore`] in-process, [`LanceStore`] on disk or object storage).
pub mod lance_store;
pub mod lance_utils;
mod local;
pub mod namespace;
mod pool;
pub mod remote;
pub mod stats;
pub mod tier;

pub use lance_store::LanceStore;
pub use namespace::{derive_key, Namespace};
pub use remote::{MemoryStore, RemoteStore, StoredValue};
pub use stats::NamespaceStats;
pub use tier::{CacheTier, RemoteHealth};
