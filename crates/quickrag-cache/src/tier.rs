use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use quickrag_core::clock::SharedClock;
use quickrag_core::config::{CacheSettings, PoolSettings};
use quickrag_core::Result;

use crate::local::LocalTier;
use crate::namespace::Namespace;
use crate::pool::PermitPool;
use crate::remote::RemoteStore;
use crate::stats::{NamespaceStats, TierCounters};

struct NamespacePool {
    ttl: Duration,
    local: LocalTier,
    permits: PermitPool,
    counters: TierCounters,
}

/// Outcome of one bounded call into the shared tier.
enum Remote<T> {
    Done(T),
    Unavailable,
}

/// Two-level best-effort cache. L1 is an in-process bounded map per
/// namespace; L2 is an optional shared [`RemoteStore`]. Nothing here
/// returns an error: failures surface as misses or a `false` write result
/// and are counted in [`CacheTier::stats`].
pub struct CacheTier {
    pools: [NamespacePool; 3],
    remote: Option<Arc<dyn RemoteStore>>,
    op_timeout: Duration,
    clock: SharedClock,
}

impl CacheTier {
    pub fn new(settings: &CacheSettings, remote: Option<Arc<dyn RemoteStore>>, clock: SharedClock) -> Self {
        let acquire = Duration::from_millis(settings.remote.acquire_timeout_ms);
        let conns = settings.remote.max_connections;
        let pool = |p: &PoolSettings| NamespacePool {
            ttl: Duration::from_secs(p.ttl_secs),
            local: LocalTier::new(p.max_entries),
            permits: PermitPool::new(conns, acquire),
            counters: TierCounters::default(),
        };
        Self {
            pools: [pool(&settings.retrieval), pool(&settings.embeddings), pool(&settings.answers)],
            remote,
            op_timeout: Duration::from_millis(settings.remote.op_timeout_ms),
            clock,
        }
    }

    /// L1 only; every L1 miss is a miss.
    pub fn local_only(settings: &CacheSettings, clock: SharedClock) -> Self {
        Self::new(settings, None, clock)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Default time-to-live for entries in `ns`.
    pub fn ttl(&self, ns: Namespace) -> Duration {
        self.pool(ns).ttl
    }

    fn pool(&self, ns: Namespace) -> &NamespacePool {
        &self.pools[ns.index()]
    }

    fn expiry(&self, ns: Namespace, ttl: Option<Duration>) -> Option<i64> {
        let ttl = ttl.unwrap_or(self.pool(ns).ttl);
        if ttl.is_zero() {
            return None;
        }
        Some(self.clock.now_ms().saturating_add(ttl.as_millis() as i64))
    }

    /// Run `op` against L2 under a pool permit and the per-call timeout.
    async fn call_remote<T, F, Fut>(&self, ns: Namespace, op: F) -> Remote<T>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(remote) = self.remote.clone() else { return Remote::Unavailable };
        let pool = self.pool(ns);
        let Some(_permit) = pool.permits.acquire().await else {
            TierCounters::bump(&pool.counters.pool_exhausted);
            debug!(namespace = %ns, "cache pool exhausted");
            return Remote::Unavailable;
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.op_timeout, op(remote)).await;
        pool.counters.l2_latency(started.elapsed());
        match outcome {
            Ok(Ok(v)) => Remote::Done(v),
            Ok(Err(e)) => {
                TierCounters::bump(&pool.counters.l2_errors);
                warn!(namespace = %ns, error = %e, "shared cache call failed");
                Remote::Unavailable
            }
            Err(_) => {
                TierCounters::bump(&pool.counters.l2_timeouts);
                debug!(namespace = %ns, timeout_ms = self.op_timeout.as_millis() as u64, "shared cache call timed out");
                Remote::Unavailable
            }
        }
    }

    pub async fn get(&self, ns: Namespace, key: &str) -> Option<Vec<u8>> {
        let pool = self.pool(ns);
        let now = self.clock.now_ms();
        let started = Instant::now();
        let local = pool.local.get(key, now);
        pool.counters.l1_latency(started.elapsed());
        if let Some(v) = local {
            TierCounters::bump(&pool.counters.l1_hits);
            return Some(v.as_ref().clone());
        }

        let owned = key.to_string();
        if let Remote::Done(Some(stored)) = self.call_remote(ns, |r| async move { r.get(ns, &owned).await }).await {
            if stored.expires_at_ms > now {
                let value = Arc::new(stored.value);
                pool.local.insert(key.to_string(), Arc::clone(&value), stored.expires_at_ms);
                TierCounters::bump(&pool.counters.l2_hits);
                return Some(value.as_ref().clone());
            }
        }
        TierCounters::bump(&pool.counters.misses);
        None
    }

    /// Store in both levels. Returns `true` only when every configured
    /// level accepted the write.
    pub async fn set(&self, ns: Namespace, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> bool {
        let Some(expires_at) = self.expiry(ns, ttl) else { return false };
        let pool = self.pool(ns);
        let value = Arc::new(value);
        pool.local.insert(key.to_string(), Arc::clone(&value), expires_at);
        TierCounters::bump(&pool.counters.writes);

        if self.remote.is_none() {
            return true;
        }
        let owned = key.to_string();
        let payload = Arc::clone(&value);
        match self.call_remote(ns, |r| async move { r.set(ns, &owned, &payload, expires_at).await }).await {
            Remote::Done(()) => true,
            Remote::Unavailable => {
                TierCounters::bump(&pool.counters.write_failures);
                false
            }
        }
    }

    /// Batched lookup; absent keys are simply missing from the map.
    pub async fn get_many(&self, ns: Namespace, keys: &[String]) -> HashMap<String, Vec<u8>> {
        let pool = self.pool(ns);
        let now = self.clock.now_ms();
        let mut found = HashMap::with_capacity(keys.len());
        let mut pending = Vec::new();
        for k in keys {
            let started = Instant::now();
            let local = pool.local.get(k, now);
            pool.counters.l1_latency(started.elapsed());
            match local {
                Some(v) => {
                    TierCounters::bump(&pool.counters.l1_hits);
                    found.insert(k.clone(), v.as_ref().clone());
                }
                None => pending.push(k.clone()),
            }
        }
        if pending.is_empty() {
            return found;
        }

        let wanted = pending.clone();
        if let Remote::Done(rows) = self.call_remote(ns, |r| async move { r.get_many(ns, &wanted).await }).await {
            for (k, stored) in rows {
                if stored.expires_at_ms <= now || found.contains_key(&k) || !pending.contains(&k) {
                    continue;
                }
                let value = Arc::new(stored.value);
                pool.local.insert(k.clone(), Arc::clone(&value), stored.expires_at_ms);
                TierCounters::bump(&pool.counters.l2_hits);
                found.insert(k, value.as_ref().clone());
            }
        }
        let missed = pending.iter().filter(|k| !found.contains_key(*k)).count();
        pool.counters.misses.fetch_add(missed as u64, std::sync::atomic::Ordering::Relaxed);
        found
    }

    /// Batched store sharing one expiry. Returns how many entries reached
    /// every configured level.
    pub async fn set_many(&self, ns: Namespace, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> usize {
        if entries.is_empty() {
            return 0;
        }
        let Some(expires_at) = self.expiry(ns, ttl) else { return 0 };
        let pool = self.pool(ns);
        for (k, v) in &entries {
            pool.local.insert(k.clone(), Arc::new(v.clone()), expires_at);
        }
        let n = entries.len();
        pool.counters.writes.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
        if self.remote.is_none() {
            return n;
        }
        match self.call_remote(ns, |r| async move { r.set_many(ns, &entries, expires_at).await }).await {
            Remote::Done(()) => n,
            Remote::Unavailable => {
                pool.counters.write_failures.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
                0
            }
        }
    }

    /// Typed lookup. A payload that no longer decodes is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Option<T> {
        let bytes = self.get(ns, key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(namespace = %ns, key, error = %e, "ignoring undecodable cache payload");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, ns: Namespace, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(ns, key, bytes, ttl).await,
            Err(e) => {
                warn!(namespace = %ns, key, error = %e, "cache payload failed to encode");
                false
            }
        }
    }

    /// Evict expired entries from both levels; returns how many were dropped.
    /// Each namespace's L2 purge runs under that namespace's permit and the
    /// per-call timeout.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut purged: usize = self.pools.iter().map(|p| p.local.purge_expired(now)).sum();
        if self.remote.is_none() {
            return purged;
        }
        for ns in Namespace::ALL {
            if let Remote::Done(n) = self.call_remote(ns, |r| async move { r.purge_expired(ns, now).await }).await {
                purged += n;
            }
        }
        purged
    }

    pub fn stats(&self) -> BTreeMap<Namespace, NamespaceStats> {
        Namespace::ALL
            .into_iter()
            .map(|ns| {
                let pool = self.pool(ns);
                (ns, pool.counters.snapshot(pool.local.len()))
            })
            .collect()
    }

    /// Round-trip to the shared tier. `None` when no shared tier is configured.
    pub async fn remote_health(&self) -> Option<RemoteHealth> {
        let remote = self.remote.as_ref()?;
        let started = Instant::now();
        let res = tokio::time::timeout(self.op_timeout, remote.ping()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        Some(match res {
            Ok(Ok(())) => RemoteHealth { healthy: true, latency_ms, error: None },
            Ok(Err(e)) => RemoteHealth { healthy: false, latency_ms, error: Some(e.to_string()) },
            Err(_) => RemoteHealth { healthy: false, latency_ms, error: Some("timed out".into()) },
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteHealth {
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
