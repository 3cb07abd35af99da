//! quickrag-vector
//!
//! Dense retrieval backends implementing [`quickrag_core::VectorIndex`]:
//! a LanceDB table with cosine search and a brute-force in-memory index.
pub mod lance;
pub mod memory;
pub mod schema;

pub use lance::LanceVectorIndex;
pub use memory::MemoryVectorIndex;
