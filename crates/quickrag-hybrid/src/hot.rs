//! Per-query access counts, the source of popular queries for warming.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1_000;

/// One tracked query. `last_seen` is a sequence number, larger is more recent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotQuery {
    pub query: String,
    pub count: u64,
    pub last_seen: u64,
}

#[derive(Debug, Clone, Copy)]
struct Access {
    count: u64,
    last_seen: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Access>,
    tick: u64,
}

/// Bounded access counter keyed by normalized query text. When full, the
/// least-accessed entry (oldest on ties) makes room for a new query.
#[derive(Debug)]
pub struct AccessLog {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AccessLog {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), capacity: capacity.max(1) }
    }

    pub fn record(&self, query: &str) {
        if query.is_empty() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else { return };
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(a) = inner.entries.get_mut(query) {
            a.count += 1;
            a.last_seen = tick;
            return;
        }
        if inner.entries.len() >= self.capacity {
            let coldest = inner
                .entries
                .iter()
                .min_by_key(|(_, a)| (a.count, a.last_seen))
                .map(|(q, _)| q.clone());
            if let Some(q) = coldest {
                inner.entries.remove(&q);
            }
        }
        inner.entries.insert(query.to_string(), Access { count: 1, last_seen: tick });
    }

    /// Up to `limit` queries, most accessed first, then most recent.
    pub fn hot(&self, limit: usize) -> Vec<HotQuery> {
        let mut all = self.snapshot();
        all.truncate(limit);
        all
    }

    /// Every tracked query in hot order.
    pub fn snapshot(&self) -> Vec<HotQuery> {
        let Ok(inner) = self.inner.lock() else { return Vec::new() };
        let mut all: Vec<HotQuery> = inner
            .entries
            .iter()
            .map(|(q, a)| HotQuery { query: q.clone(), count: a.count, last_seen: a.last_seen })
            .collect();
        all.sort_by(|a, b| b.count.cmp(&a.count).then(b.last_seen.cmp(&a.last_seen)).then(a.query.cmp(&b.query)));
        all
    }

    /// Load previously saved counts, replacing any entry with the same query.
    pub fn restore(&self, saved: Vec<HotQuery>) {
        let Ok(mut inner) = self.inner.lock() else { return };
        for h in saved.into_iter().take(self.capacity) {
            inner.tick = inner.tick.max(h.last_seen);
            inner.entries.insert(h.query, Access { count: h.count, last_seen: h.last_seen });
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(hot: &[HotQuery]) -> Vec<&str> {
        hot.iter().map(|h| h.query.as_str()).collect()
    }

    #[test]
    fn most_accessed_first_then_most_recent() {
        let log = AccessLog::new(10);
        for q in ["solar", "rain", "solar", "compost", "rain", "solar", "wells"] {
            log.record(q);
        }
        let hot = log.hot(3);
        assert_eq!(names(&hot), vec!["solar", "rain", "wells"]);
        assert_eq!(hot[0].count, 3);
    }

    #[test]
    fn full_log_drops_the_coldest_entry() {
        let log = AccessLog::new(2);
        log.record("a");
        log.record("a");
        log.record("b");
        log.record("c");
        assert_eq!(log.len(), 2);
        assert_eq!(names(&log.snapshot()), vec!["a", "c"]);
    }

    #[test]
    fn restored_counts_keep_accumulating() {
        let log = AccessLog::new(10);
        log.record("x");
        log.record("y");
        log.record("y");
        let saved = log.snapshot();

        let fresh = AccessLog::new(10);
        fresh.restore(saved);
        fresh.record("x");
        fresh.record("x");
        assert_eq!(names(&fresh.hot(1)), vec!["x"]);
        assert_eq!(fresh.hot(1)[0].count, 3);
    }

    #[test]
    fn empty_query_is_ignored() {
        let log = AccessLog::default();
        log.record("");
        assert!(log.is_empty());
    }
}
