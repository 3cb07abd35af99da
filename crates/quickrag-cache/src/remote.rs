use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use quickrag_core::Result;

use crate::namespace::Namespace;

/// A value as held by the shared tier, with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    pub expires_at_ms: i64,
}

/// L2: a store shared between processes. Every call may be slow or fail;
/// the tier bounds each call and treats failure as a miss.
///
/// Implementations return entries regardless of expiry; the tier compares
/// `expires_at_ms` against its own clock.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<StoredValue>>;
    async fn get_many(&self, ns: Namespace, keys: &[String]) -> Result<HashMap<String, StoredValue>>;
    async fn set(&self, ns: Namespace, key: &str, value: &[u8], expires_at_ms: i64) -> Result<()>;
    async fn set_many(&self, ns: Namespace, entries: &[(String, Vec<u8>)], expires_at_ms: i64) -> Result<()>;
    /// Drop entries of `ns` that expired at or before `now_ms`; returns the count when known.
    async fn purge_expired(&self, ns: Namespace, now_ms: i64) -> Result<usize>;
    async fn ping(&self) -> Result<()>;
}

/// Process-local stand-in for a shared store; useful for single-node runs
/// and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(Namespace, String), StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> quickrag_core::Error {
    quickrag_core::Error::Backend("memory store lock poisoned".into())
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<StoredValue>> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(map.get(&(ns, key.to_string())).cloned())
    }

    async fn get_many(&self, ns: Namespace, keys: &[String]) -> Result<HashMap<String, StoredValue>> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(keys.iter().filter_map(|k| map.get(&(ns, k.clone())).map(|v| (k.clone(), v.clone()))).collect())
    }

    async fn set(&self, ns: Namespace, key: &str, value: &[u8], expires_at_ms: i64) -> Result<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        map.insert((ns, key.to_string()), StoredValue { value: value.to_vec(), expires_at_ms });
        Ok(())
    }

    async fn set_many(&self, ns: Namespace, entries: &[(String, Vec<u8>)], expires_at_ms: i64) -> Result<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        for (k, v) in entries {
            map.insert((ns, k.clone()), StoredValue { value: v.clone(), expires_at_ms });
        }
        Ok(())
    }

    async fn purge_expired(&self, ns: Namespace, now_ms: i64) -> Result<usize> {
        let mut map = self.entries.write().map_err(poisoned)?;
        let before = map.len();
        map.retain(|(n, _), v| *n != ns || v.expires_at_ms > now_ms);
        Ok(before - map.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
