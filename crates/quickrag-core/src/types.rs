//! Domain types shared by the sparse, dense and hybrid engines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, serde_json::Value>;

/// A chunk of a source document that is independently indexed.
///
/// - `chunk_id`: unique chunk identifier, the unit of dedup in fusion
/// - `doc_id`: stable document identity; deletes operate on it
/// - `source`/`title`: where the chunk came from, for display
/// - `content_hash`: blake3 of `content`; the sparse index dedups on it
/// - `chunk_index`: position within the parent document
///
/// Chunks are immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub doc_id: String,
    pub chunk_id: ChunkId,
    pub source: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub metadata: Meta,
}

impl DocumentChunk {
    pub fn new(
        doc_id: impl Into<String>,
        chunk_id: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        let content = content.into();
        Self {
            doc_id: doc_id.into(),
            chunk_id: chunk_id.into(),
            source: source.into(),
            title: title.into(),
            content_hash: content_hash(&content),
            content,
            chunk_index,
            metadata: Meta::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Hex blake3 digest of a chunk's text.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Sparse,
    Dense,
    Hybrid,
}

/// One ranked hit. `score` is engine-specific but higher is always better.
///
/// Results are never mutated after creation; fusion builds new values and
/// records the original ranks and scores in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub doc_id: String,
    pub chunk_id: ChunkId,
    pub source: String,
    pub title: String,
    pub content: String,
    pub score: f32,
    pub origin: Origin,
    #[serde(default)]
    pub metadata: Meta,
}

impl RetrievalResult {
    /// Build a result from the chunk it points at, carrying the chunk's
    /// metadata plus `chunk_index` and `content_hash`.
    pub fn from_chunk(chunk: &DocumentChunk, score: f32, origin: Origin) -> Self {
        let mut metadata = chunk.metadata.clone();
        metadata.insert("chunk_index".into(), chunk.chunk_index.into());
        metadata.insert("content_hash".into(), chunk.content_hash.clone().into());
        Self {
            doc_id: chunk.doc_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            source: chunk.source.clone(),
            title: chunk.title.clone(),
            content: chunk.content.clone(),
            score,
            origin,
            metadata,
        }
    }
}

/// Strategy used to merge the sparse and dense lists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    #[default]
    Rrf,
    Weighted,
}

impl FusionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            FusionMethod::Rrf => "rrf",
            FusionMethod::Weighted => "weighted",
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rrf" => Ok(FusionMethod::Rrf),
            "weighted" => Ok(FusionMethod::Weighted),
            _ => Err(Error::UnknownFusionMethod(s.to_string())),
        }
    }
}

/// Parameters a fusion run actually used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FusionParams {
    Rrf { k: u32 },
    Weighted { sparse_weight: f32, dense_weight: f32 },
}

impl FusionParams {
    pub fn method(&self) -> FusionMethod {
        match self {
            FusionParams::Rrf { .. } => FusionMethod::Rrf,
            FusionParams::Weighted { .. } => FusionMethod::Weighted,
        }
    }
}

/// Counters and timings attached to every hybrid result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDebug {
    pub sparse_count: usize,
    pub dense_count: usize,
    pub fused_count: usize,
    pub cache_hit: bool,
    pub parallel_retrieval_ms: f64,
    pub total_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_error: Option<String>,
}

/// The unit returned to callers of the hybrid retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridRetrievalResult {
    pub results: Vec<RetrievalResult>,
    pub fusion_method: FusionMethod,
    pub fusion_params: FusionParams,
    pub debug: RetrievalDebug,
}

impl HybridRetrievalResult {
    pub fn chunk_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.chunk_id.as_str()).collect()
    }
}
