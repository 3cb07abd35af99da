//! quickrag-text
//!
//! BM25 sparse retrieval over document chunks: postings-driven scoring,
//! a per-generation result memo and an atomically replaced JSON snapshot.
pub mod bm25;
mod cache;
pub mod index;
pub mod snapshot;

pub use bm25::Bm25Params;
pub use index::{SparseIndex, SparseStats};
