use thiserror::Error;

/// Error taxonomy for the retrieval core.
///
/// Only `InvalidConfig` and `UnknownFusionMethod` are meant to reach a caller
/// of `retrieve`; the remaining variants are produced by collaborators and
/// are downgraded to empty results or cache misses at the call site.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown fusion method: {0:?} (expected \"rrf\" or \"weighted\")")]
    UnknownFusionMethod(String),

    #[error("Retriever not ready: {0}")]
    NotReady(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap any adapter error (LanceDB, HTTP client, ...) as a backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }

    /// True for errors that describe a caller bug rather than a runtime condition.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::UnknownFusionMethod(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
