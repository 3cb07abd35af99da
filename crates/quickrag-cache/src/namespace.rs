use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use quickrag_core::Error;

/// Independently sized and expired cache pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Retrieval,
    Embeddings,
    Answers,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Retrieval, Namespace::Embeddings, Namespace::Answers];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Retrieval => "retrieval",
            Namespace::Embeddings => "embeddings",
            Namespace::Answers => "answers",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Namespace::Retrieval => 0,
            Namespace::Embeddings => 1,
            Namespace::Answers => 2,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown cache namespace {s:?}")))
    }
}

/// Content-derived cache key: `prefix:` + hex blake3 over the parts, each
/// length-prefixed so `("ab","c")` and `("a","bc")` never collide.
pub fn derive_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for p in parts {
        hasher.update(&(p.len() as u64).to_le_bytes());
        hasher.update(p.as_bytes());
    }
    format!("{prefix}:{}", hasher.finalize().to_hex())
}
