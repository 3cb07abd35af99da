#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod clock;
pub mod config;
pub mod error;
pub mod tokenize;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use traits::{EmbedProvider, SparseRetriever, VectorIndex};
pub use types::{
    ChunkId, DocumentChunk, FusionMethod, FusionParams, HybridRetrievalResult, Meta, Origin, RetrievalDebug,
    RetrievalResult,
};
