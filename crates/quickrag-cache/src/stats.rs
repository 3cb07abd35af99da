use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Weight of the newest sample in the rolling latency average.
const LATENCY_ALPHA: f64 = 0.1;

/// Exponentially weighted moving average of latency samples, kept as the
/// bit pattern of an `f64` microsecond value.
#[derive(Debug, Default)]
pub(crate) struct RollingLatency {
    samples: AtomicU64,
    micros: AtomicU64,
}

impl RollingLatency {
    pub fn record(&self, d: Duration) {
        let sample = d.as_secs_f64() * 1_000_000.0;
        let first = self.samples.fetch_add(1, Ordering::Relaxed) == 0;
        let _ = self.micros.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            let next = if first {
                sample
            } else {
                let prev = f64::from_bits(bits);
                prev + LATENCY_ALPHA * (sample - prev)
            };
            Some(next.to_bits())
        });
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples.load(Ordering::Relaxed) == 0 {
            return 0.0;
        }
        round2(f64::from_bits(self.micros.load(Ordering::Relaxed)) / 1000.0)
    }
}

/// Lock-free counters for one namespace.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub write_failures: AtomicU64,
    pub pool_exhausted: AtomicU64,
    pub l2_errors: AtomicU64,
    pub l2_timeouts: AtomicU64,
    l1_latency: RollingLatency,
    l2_latency: RollingLatency,
}

impl TierCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn l1_latency(&self, d: Duration) {
        self.l1_latency.record(d);
    }

    pub fn l2_latency(&self, d: Duration) {
        self.l2_latency.record(d);
    }

    pub fn snapshot(&self, l1_entries: u64) -> NamespaceStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let (l1, l2, miss) = (get(&self.l1_hits), get(&self.l2_hits), get(&self.misses));
        let total = l1 + l2 + miss;
        let pct = |n: u64| if total == 0 { 0.0 } else { (n as f64 / total as f64 * 1000.0).round() / 10.0 };
        NamespaceStats {
            l1_hits: l1,
            l2_hits: l2,
            misses: miss,
            writes: get(&self.writes),
            write_failures: get(&self.write_failures),
            pool_exhausted: get(&self.pool_exhausted),
            l2_errors: get(&self.l2_errors),
            l2_timeouts: get(&self.l2_timeouts),
            l1_entries,
            l1_hit_rate: pct(l1),
            l2_hit_rate: pct(l2),
            overall_hit_rate: pct(l1 + l2),
            l1_avg_latency_ms: self.l1_latency.average_ms(),
            l2_avg_latency_ms: self.l2_latency.average_ms(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Point-in-time view of one namespace. Rates are percentages; latency
/// averages are rolling, so old samples fade out.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NamespaceStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub pool_exhausted: u64,
    pub l2_errors: u64,
    pub l2_timeouts: u64,
    pub l1_entries: u64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub overall_hit_rate: f64,
    pub l1_avg_latency_ms: f64,
    pub l2_avg_latency_ms: f64,
}

impl NamespaceStats {
    pub fn lookups(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.misses
    }
}
