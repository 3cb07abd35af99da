use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quickrag_cache::{CacheTier, MemoryStore, Namespace, RemoteStore, StoredValue};
use quickrag_core::clock::{ManualClock, SharedClock};
use quickrag_core::config::CacheSettings;
use quickrag_core::{Error, Result};

fn settings() -> CacheSettings {
    let mut s = CacheSettings::default();
    s.remote.acquire_timeout_ms = 20;
    s.remote.op_timeout_ms = 30;
    s
}

fn clock() -> (Arc<ManualClock>, SharedClock) {
    let manual = Arc::new(ManualClock::new(1_000_000));
    let shared: SharedClock = manual.clone();
    (manual, shared)
}

/// Shared tier that is down.
struct DownStore;

#[async_trait]
impl RemoteStore for DownStore {
    async fn get(&self, _: Namespace, _: &str) -> Result<Option<StoredValue>> {
        Err(Error::Backend("connection refused".into()))
    }
    async fn get_many(&self, _: Namespace, _: &[String]) -> Result<HashMap<String, StoredValue>> {
        Err(Error::Backend("connection refused".into()))
    }
    async fn set(&self, _: Namespace, _: &str, _: &[u8], _: i64) -> Result<()> {
        Err(Error::Backend("connection refused".into()))
    }
    async fn set_many(&self, _: Namespace, _: &[(String, Vec<u8>)], _: i64) -> Result<()> {
        Err(Error::Backend("connection refused".into()))
    }
    async fn purge_expired(&self, _: Namespace, _: i64) -> Result<usize> {
        Err(Error::Backend("connection refused".into()))
    }
    async fn ping(&self) -> Result<()> {
        Err(Error::Backend("connection refused".into()))
    }
}

/// Shared tier that answers, eventually.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<StoredValue>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(ns, key).await
    }
    async fn get_many(&self, ns: Namespace, keys: &[String]) -> Result<HashMap<String, StoredValue>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_many(ns, keys).await
    }
    async fn set(&self, ns: Namespace, key: &str, value: &[u8], exp: i64) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(ns, key, value, exp).await
    }
    async fn set_many(&self, ns: Namespace, entries: &[(String, Vec<u8>)], exp: i64) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_many(ns, entries, exp).await
    }
    async fn purge_expired(&self, ns: Namespace, now: i64) -> Result<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.purge_expired(ns, now).await
    }
    async fn ping(&self) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[tokio::test]
async fn set_then_get_round_trips_until_ttl_expires() {
    let (manual, clock) = clock();
    let tier = CacheTier::new(&settings(), Some(Arc::new(MemoryStore::new())), clock);
    assert!(tier.set(Namespace::Retrieval, "k", b"payload".to_vec(), Some(Duration::from_secs(10))).await);
    assert_eq!(tier.get(Namespace::Retrieval, "k").await.as_deref(), Some(&b"payload"[..]));

    manual.advance_secs(11);
    assert!(tier.get(Namespace::Retrieval, "k").await.is_none(), "expired in both levels");
    let stats = &tier.stats()[&Namespace::Retrieval];
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn default_ttl_comes_from_namespace_pool() {
    let (manual, clock) = clock();
    let tier = CacheTier::local_only(&settings(), clock);
    assert_eq!(tier.ttl(Namespace::Retrieval), Duration::from_secs(120));
    tier.set(Namespace::Retrieval, "r", vec![1], None).await;
    tier.set(Namespace::Embeddings, "e", vec![2], None).await;
    manual.advance_secs(121);
    assert!(tier.get(Namespace::Retrieval, "r").await.is_none());
    assert!(tier.get(Namespace::Embeddings, "e").await.is_some(), "embeddings live for an hour");
}

#[tokio::test]
async fn l2_hit_populates_l1_with_remaining_ttl() {
    let (manual, clock) = clock();
    let shared = Arc::new(MemoryStore::new());
    let writer = CacheTier::new(&settings(), Some(shared.clone()), clock.clone());
    writer.set(Namespace::Answers, "a", b"42".to_vec(), Some(Duration::from_secs(60))).await;

    // A second process sharing L2 but with a cold L1.
    let reader = CacheTier::new(&settings(), Some(shared), clock);
    manual.advance_secs(30);
    assert_eq!(reader.get(Namespace::Answers, "a").await.as_deref(), Some(&b"42"[..]));
    assert_eq!(reader.get(Namespace::Answers, "a").await.as_deref(), Some(&b"42"[..]));
    let stats = &reader.stats()[&Namespace::Answers];
    assert_eq!((stats.l2_hits, stats.l1_hits), (1, 1));

    manual.advance_secs(31);
    assert!(reader.get(Namespace::Answers, "a").await.is_none(), "L1 copy keeps the original expiry");
}

#[tokio::test]
async fn unavailable_shared_tier_degrades_to_l1() {
    let (_, clock) = clock();
    let tier = CacheTier::new(&settings(), Some(Arc::new(DownStore)), clock);
    assert!(!tier.set(Namespace::Retrieval, "k", vec![7], None).await, "partial write reports false");
    assert_eq!(tier.get(Namespace::Retrieval, "k").await, Some(vec![7]), "L1 still serves it");
    assert!(tier.get(Namespace::Retrieval, "other").await.is_none());

    let stats = &tier.stats()[&Namespace::Retrieval];
    assert_eq!(stats.write_failures, 1);
    assert_eq!(stats.l2_errors, 2);
    let health = tier.remote_health().await.unwrap();
    assert!(!health.healthy);
}

#[tokio::test]
async fn slow_shared_tier_is_bounded_by_op_timeout() {
    let (_, clock) = clock();
    let slow = SlowStore { inner: MemoryStore::new(), delay: Duration::from_millis(500) };
    let tier = CacheTier::new(&settings(), Some(Arc::new(slow)), clock);
    let started = std::time::Instant::now();
    assert!(tier.get(Namespace::Embeddings, "k").await.is_none());
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(tier.stats()[&Namespace::Embeddings].l2_timeouts, 1);
}

#[tokio::test]
async fn pool_exhaustion_is_a_miss_not_a_stall() {
    let (_, clock) = clock();
    let mut s = settings();
    s.remote.max_connections = 1;
    s.remote.op_timeout_ms = 1_000;
    let slow = SlowStore { inner: MemoryStore::new(), delay: Duration::from_millis(200) };
    let tier = Arc::new(CacheTier::new(&s, Some(Arc::new(slow)), clock));

    let busy = {
        let tier = tier.clone();
        tokio::spawn(async move { tier.get(Namespace::Retrieval, "slow").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = std::time::Instant::now();
    assert!(tier.get(Namespace::Retrieval, "other").await.is_none());
    assert!(started.elapsed() < Duration::from_millis(150));
    busy.await.unwrap();
    assert_eq!(tier.stats()[&Namespace::Retrieval].pool_exhausted, 1);
}

#[tokio::test]
async fn batch_operations_mix_levels() {
    let (_, clock) = clock();
    let shared = Arc::new(MemoryStore::new());
    let a = CacheTier::new(&settings(), Some(shared.clone()), clock.clone());
    let stored = a
        .set_many(Namespace::Embeddings, vec![("x".into(), vec![1]), ("y".into(), vec![2])], None)
        .await;
    assert_eq!(stored, 2);

    let b = CacheTier::new(&settings(), Some(shared), clock);
    b.set(Namespace::Embeddings, "z", vec![3], None).await;
    let keys: Vec<String> = ["x", "y", "z", "missing"].iter().map(|s| s.to_string()).collect();
    let got = b.get_many(Namespace::Embeddings, &keys).await;
    assert_eq!(got.len(), 3);
    assert_eq!(got["y"], vec![2]);
    let stats = &b.stats()[&Namespace::Embeddings];
    assert_eq!((stats.l1_hits, stats.l2_hits, stats.misses), (1, 2, 1));
}

#[tokio::test]
async fn json_helpers_treat_garbage_as_miss() {
    let (_, clock) = clock();
    let tier = CacheTier::local_only(&settings(), clock);
    assert!(tier.set_json(Namespace::Answers, "ok", &vec![1u32, 2, 3], None).await);
    assert_eq!(tier.get_json::<Vec<u32>>(Namespace::Answers, "ok").await, Some(vec![1, 2, 3]));

    tier.set(Namespace::Answers, "bad", b"{oops".to_vec(), None).await;
    assert!(tier.get_json::<Vec<u32>>(Namespace::Answers, "bad").await.is_none());
}

#[tokio::test]
async fn purge_expired_clears_both_levels() {
    let (manual, clock) = clock();
    let shared = Arc::new(MemoryStore::new());
    let tier = CacheTier::new(&settings(), Some(shared.clone()), clock);
    tier.set(Namespace::Retrieval, "short", vec![1], Some(Duration::from_secs(1))).await;
    tier.set(Namespace::Retrieval, "long", vec![2], Some(Duration::from_secs(100))).await;
    manual.advance_secs(5);
    assert_eq!(tier.purge_expired().await, 2, "one from L1 and one from L2");
    assert_eq!(shared.len(), 1);
}

#[tokio::test]
async fn purge_against_slow_shared_tier_is_bounded_per_namespace() {
    let (manual, clock) = clock();
    let slow = SlowStore { inner: MemoryStore::new(), delay: Duration::from_millis(500) };
    let tier = CacheTier::new(&settings(), Some(Arc::new(slow)), clock);
    tier.set(Namespace::Answers, "gone", vec![1], Some(Duration::from_secs(1))).await;
    manual.advance_secs(5);

    let started = std::time::Instant::now();
    assert_eq!(tier.purge_expired().await, 1, "only the L1 entry is counted");
    assert!(started.elapsed() < Duration::from_millis(400));
    let stats = tier.stats();
    for ns in Namespace::ALL {
        assert!(stats[&ns].l2_timeouts >= 1, "{ns} purge ran without the timeout guard");
    }
}

#[tokio::test]
async fn purge_with_shared_tier_down_still_drops_l1() {
    let (manual, clock) = clock();
    let tier = CacheTier::new(&settings(), Some(Arc::new(DownStore)), clock);
    tier.set(Namespace::Retrieval, "gone", vec![1], Some(Duration::from_secs(1))).await;
    manual.advance_secs(5);
    assert_eq!(tier.purge_expired().await, 1);
    assert_eq!(tier.stats()[&Namespace::Retrieval].l2_errors, 2, "one failed write, one failed purge");
}

#[tokio::test]
async fn zero_ttl_is_not_stored() {
    let (_, clock) = clock();
    let tier = CacheTier::local_only(&settings(), clock);
    assert!(!tier.set(Namespace::Retrieval, "k", vec![1], Some(Duration::ZERO)).await);
    assert!(tier.get(Namespace::Retrieval, "k").await.is_none());
}
