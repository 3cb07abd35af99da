//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars (nested keys split on `__`, e.g.
//! `APP_BM25__K1=1.5`). Provides helpers to expand `~` and `${VAR}` and to
//! resolve relative paths against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::FusionMethod;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an already assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub bm25: Bm25Settings,
    pub fusion: FusionSettings,
    pub retrieval: RetrievalSettings,
    pub cache: CacheSettings,
    pub vector: VectorSettings,
    pub monitor: MonitorSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.bm25.k1 < 0.0 {
            return Err(Error::InvalidConfig(format!("bm25.k1 must be >= 0, got {}", self.bm25.k1)));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(Error::InvalidConfig(format!("bm25.b must be in [0,1], got {}", self.bm25.b)));
        }
        if self.fusion.rrf_k == 0 {
            return Err(Error::InvalidConfig("fusion.rrf_k must be > 0".into()));
        }
        for (name, w) in [("fusion.sparse_weight", self.fusion.sparse_weight), ("fusion.dense_weight", self.fusion.dense_weight)] {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::InvalidConfig(format!("{name} must be in [0,1], got {w}")));
            }
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.max_top_k < self.retrieval.default_top_k {
            return Err(Error::InvalidConfig(format!(
                "retrieval.default_top_k ({}) must be in 1..=max_top_k ({})",
                self.retrieval.default_top_k, self.retrieval.max_top_k
            )));
        }
        if self.vector.dim == 0 {
            return Err(Error::InvalidConfig("vector.dim must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bm25Settings {
    pub k1: f32,
    pub b: f32,
    pub min_score: f32,
    pub idf_floor: f32,
    pub result_cache_entries: usize,
    pub snapshot_path: Option<String>,
}

impl Default for Bm25Settings {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, min_score: 0.001, idf_floor: 0.01, result_cache_entries: 200, snapshot_path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionSettings {
    pub default_method: FusionMethod,
    pub rrf_k: u32,
    pub sparse_weight: f32,
    pub dense_weight: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self { default_method: FusionMethod::Rrf, rrf_k: 60, sparse_weight: 0.4, dense_weight: 0.6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { default_top_k: 12, max_top_k: 50 }
    }
}

/// Size and lifetime of one cache namespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteSettings {
    /// LanceDB URI for the shared tier; `None` keeps the tier in-process.
    pub uri: Option<String>,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub op_timeout_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self { uri: None, max_connections: 16, acquire_timeout_ms: 25, op_timeout_ms: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
    pub retrieval: PoolSettings,
    pub embeddings: PoolSettings,
    pub answers: PoolSettings,
    pub remote: RemoteSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            retrieval: PoolSettings { max_entries: 10_000, ttl_secs: 120 },
            embeddings: PoolSettings { max_entries: 50_000, ttl_secs: 3600 },
            answers: PoolSettings { max_entries: 5_000, ttl_secs: 600 },
            remote: RemoteSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VectorSettings {
    pub uri: Option<String>,
    pub table: String,
    pub dim: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self { uri: None, table: "chunks".to_string(), dim: 384 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorSettings {
    pub ring_capacity: usize,
    pub alert_capacity: usize,
    pub alert_cooldown_secs: u64,
    pub derive_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { ring_capacity: 1000, alert_capacity: 100, alert_cooldown_secs: 300, derive_interval_secs: 60 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
