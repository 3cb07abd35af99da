//! L1: bounded in-process store. Expiry is judged against the injected
//! clock rather than moka's own timer so TTLs stay testable.
use moka::sync::Cache;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct LocalEntry {
    value: Arc<Vec<u8>>,
    expires_at_ms: i64,
}

pub(crate) struct LocalTier {
    cache: Cache<String, LocalEntry>,
}

impl LocalTier {
    pub(crate) fn new(max_entries: u64) -> Self {
        Self { cache: Cache::builder().max_capacity(max_entries).build() }
    }

    pub(crate) fn get(&self, key: &str, now_ms: i64) -> Option<Arc<Vec<u8>>> {
        let entry = self.cache.get(key)?;
        if entry.expires_at_ms <= now_ms {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry.value)
    }

    pub(crate) fn insert(&self, key: String, value: Arc<Vec<u8>>, expires_at_ms: i64) {
        self.cache.insert(key, LocalEntry { value, expires_at_ms });
    }

    pub(crate) fn purge_expired(&self, now_ms: i64) -> usize {
        let expired: Vec<Arc<String>> =
            self.cache.iter().filter(|(_, e)| e.expires_at_ms <= now_ms).map(|(k, _)| k).collect();
        for k in &expired {
            self.cache.invalidate(k.as_str());
        }
        self.cache.run_pending_tasks();
        expired.len()
    }

    pub(crate) fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
