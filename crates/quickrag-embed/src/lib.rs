//! quickrag-embed
//!
//! Embedding providers: a deterministic feature-hashing embedder and a
//! cache-through wrapper for any [`EmbedProvider`].
use std::sync::Arc;

use quickrag_core::traits::EmbedProvider;

pub mod cached;
pub mod hash;

pub use cached::CachedEmbedder;
pub use hash::HashEmbedder;

pub fn get_default_embedder(dim: usize) -> Arc<dyn EmbedProvider> {
    Arc::new(HashEmbedder::new(dim))
}
