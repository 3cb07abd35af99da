//! In-process performance monitor.
//!
//! Samples are kept per metric in bounded ring buffers. Each sample is
//! checked against a static threshold table; a violation raises an alert
//! unless the same `(metric, level)` pair alerted within the cooldown.
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use quickrag_core::clock::SharedClock;
use quickrag_core::config::MonitorSettings;

/// Window used by `stats`, `derive_rates` and `health_score`.
const WINDOW_MS: i64 = 5 * 60 * 1000;
const RECENT_ALERTS: usize = 10;

pub mod names {
    pub const QUERY_LATENCY_MS: &str = "query_latency_ms";
    pub const RETRIEVAL_LATENCY_MS: &str = "retrieval_latency_ms";
    pub const CACHE_HIT_RATE: &str = "cache_hit_rate";
    pub const CACHE_SIZE: &str = "cache_size";
    pub const ERROR_RATE: &str = "error_rate";
    pub const CONCURRENT_REQUESTS: &str = "concurrent_requests";
    pub const REQUESTS_PER_SECOND: &str = "requests_per_second";
    pub const REQUEST_TOTAL: &str = "request_total";
    pub const REQUEST_SUCCESS: &str = "request_success";
    pub const REQUEST_ERROR: &str = "request_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsWorse,
    LowerIsWorse,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
}

impl Threshold {
    pub const fn higher(warning: f64, critical: f64) -> Self {
        Self { warning, critical, direction: Direction::HigherIsWorse }
    }

    pub const fn lower(warning: f64, critical: f64) -> Self {
        Self { warning, critical, direction: Direction::LowerIsWorse }
    }

    /// Most severe level the value violates, with the threshold it crossed.
    pub fn evaluate(&self, value: f64) -> Option<(AlertLevel, f64)> {
        let worse = |limit: f64| match self.direction {
            Direction::HigherIsWorse => value > limit,
            Direction::LowerIsWorse => value < limit,
        };
        if worse(self.critical) {
            Some((AlertLevel::Critical, self.critical))
        } else if worse(self.warning) {
            Some((AlertLevel::Warning, self.warning))
        } else {
            None
        }
    }
}

pub fn default_thresholds() -> HashMap<String, Threshold> {
    [
        (names::QUERY_LATENCY_MS, Threshold::higher(100.0, 300.0)),
        (names::RETRIEVAL_LATENCY_MS, Threshold::higher(50.0, 150.0)),
        (names::CACHE_HIT_RATE, Threshold::lower(50.0, 30.0)),
        (names::ERROR_RATE, Threshold::higher(0.05, 0.10)),
        (names::CONCURRENT_REQUESTS, Threshold::higher(50.0, 100.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp_ms: i64,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric_name: String,
    pub current_value: f64,
    pub threshold: f64,
    pub level: AlertLevel,
    pub timestamp_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub concurrent: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricSummary {
    fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let pct = |p: f64| values[((n as f64 * p) as usize).min(n - 1)];
        Some(Self {
            count: n,
            avg: values.iter().sum::<f64>() / n as f64,
            min: values[0],
            max: values[n - 1],
            p50: pct(0.50),
            p95: pct(0.95),
            p99: pct(0.99),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStats {
    pub timestamp_ms: i64,
    pub requests: RequestCounters,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub active_alerts: usize,
    pub alert_counts: BTreeMap<String, u64>,
    pub recent_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub score: f64,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub timestamp_ms: i64,
}

#[derive(Default)]
struct Inner {
    series: HashMap<String, VecDeque<Metric>>,
    alerts: VecDeque<Alert>,
    last_alert_ms: HashMap<(String, AlertLevel), i64>,
    alert_counts: BTreeMap<String, u64>,
}

impl Inner {
    fn recent(&self, name: &str, since_ms: i64) -> Vec<f64> {
        self.series
            .get(name)
            .map(|s| s.iter().filter(|m| m.timestamp_ms > since_ms).map(|m| m.value).collect())
            .unwrap_or_default()
    }
}

pub struct PerformanceMonitor {
    settings: MonitorSettings,
    thresholds: HashMap<String, Threshold>,
    clock: SharedClock,
    inner: Mutex<Inner>,
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    concurrent: AtomicI64,
}

impl PerformanceMonitor {
    pub fn new(settings: &MonitorSettings, clock: SharedClock) -> Self {
        Self {
            settings: settings.clone(),
            thresholds: default_thresholds(),
            clock,
            inner: Mutex::new(Inner::default()),
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            concurrent: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, metric: impl Into<String>, threshold: Threshold) -> Self {
        self.thresholds.insert(metric.into(), threshold);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample and return the alert it raised, if any.
    pub fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> Option<Alert> {
        let now = self.clock.now_ms();
        let metric = Metric {
            name: name.to_string(),
            value,
            timestamp_ms: now,
            labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        };
        let mut inner = self.lock();
        let series = inner.series.entry(name.to_string()).or_default();
        if series.len() >= self.settings.ring_capacity.max(1) {
            series.pop_front();
        }
        series.push_back(metric);

        let alert = self.check_threshold(&mut inner, name, value, now)?;
        if inner.alerts.len() >= self.settings.alert_capacity.max(1) {
            inner.alerts.pop_front();
        }
        inner.alerts.push_back(alert.clone());
        *inner.alert_counts.entry(format!("{name}:{}", alert.level.as_str())).or_insert(0) += 1;
        drop(inner);

        match alert.level {
            AlertLevel::Warning => warn!(metric = name, value, threshold = alert.threshold, "{}", alert.message),
            AlertLevel::Critical => error!(metric = name, value, threshold = alert.threshold, "{}", alert.message),
        }
        Some(alert)
    }

    fn check_threshold(&self, inner: &mut Inner, name: &str, value: f64, now: i64) -> Option<Alert> {
        let (level, threshold) = self.thresholds.get(name)?.evaluate(value)?;
        let key = (name.to_string(), level);
        let cooldown_ms = i64::try_from(self.settings.alert_cooldown_secs).unwrap_or(i64::MAX / 1000) * 1000;
        if let Some(last) = inner.last_alert_ms.get(&key) {
            if now - last <= cooldown_ms {
                debug!(metric = name, level = level.as_str(), "alert suppressed by cooldown");
                return None;
            }
        }
        inner.last_alert_ms.insert(key, now);
        Some(Alert {
            metric_name: name.to_string(),
            current_value: value,
            threshold,
            level,
            timestamp_ms: now,
            message: format!("{name} is {value:.2}, exceeding {} threshold of {threshold}", level.as_str()),
        })
    }

    pub fn begin_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let concurrent = self.concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        self.record(names::REQUEST_TOTAL, 1.0, &[]);
        self.record(names::CONCURRENT_REQUESTS, concurrent as f64, &[]);
    }

    pub fn end_request(&self, success: bool, latency_ms: f64) {
        let concurrent = (self.concurrent.fetch_sub(1, Ordering::Relaxed) - 1).max(0);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            self.record(names::REQUEST_SUCCESS, 1.0, &[]);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.record(names::REQUEST_ERROR, 1.0, &[]);
        }
        self.record(names::QUERY_LATENCY_MS, latency_ms, &[]);
        self.record(names::CONCURRENT_REQUESTS, concurrent as f64, &[]);
    }

    pub fn record_retrieval_latency(&self, latency_ms: f64, kind: &str) {
        self.record(names::RETRIEVAL_LATENCY_MS, latency_ms, &[("type", kind)]);
    }

    pub fn record_cache_stats(&self, service: &str, hit_rate_percent: f64, size: u64) {
        self.record(names::CACHE_HIT_RATE, hit_rate_percent, &[("service", service)]);
        self.record(names::CACHE_SIZE, size as f64, &[("service", service)]);
    }

    /// Derive `error_rate` and `requests_per_second` from the last five
    /// minutes of request samples. Nothing is recorded without traffic.
    pub fn derive_rates(&self) {
        let since = self.clock.now_ms() - WINDOW_MS;
        let (total, errors) = {
            let inner = self.lock();
            (inner.recent(names::REQUEST_TOTAL, since).len(), inner.recent(names::REQUEST_ERROR, since).len())
        };
        if total == 0 {
            return;
        }
        self.record(names::ERROR_RATE, errors as f64 / total as f64, &[]);
        self.record(names::REQUESTS_PER_SECOND, total as f64 / (WINDOW_MS / 1000) as f64, &[]);
    }

    /// Run `derive_rates` every `derive_interval_secs` until the handle is aborted.
    pub fn spawn_rate_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = Duration::from_secs(self.settings.derive_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.derive_rates();
            }
        })
    }

    pub fn counters(&self) -> RequestCounters {
        RequestCounters {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            concurrent: self.concurrent.load(Ordering::Relaxed).max(0),
        }
    }

    pub fn stats(&self) -> MonitorStats {
        let now = self.clock.now_ms();
        let since = now - WINDOW_MS;
        let inner = self.lock();
        let metrics = inner
            .series
            .keys()
            .filter_map(|name| MetricSummary::from_values(inner.recent(name, since)).map(|s| (name.clone(), s)))
            .collect();
        let skip = inner.alerts.len().saturating_sub(RECENT_ALERTS);
        MonitorStats {
            timestamp_ms: now,
            requests: self.counters(),
            metrics,
            active_alerts: inner.alerts.len(),
            alert_counts: inner.alert_counts.clone(),
            recent_alerts: inner.alerts.iter().skip(skip).cloned().collect(),
        }
    }

    /// Average of latency, alert-volume and concurrency factors.
    pub fn health_score(&self) -> Health {
        let now = self.clock.now_ms();
        let since = now - WINDOW_MS;
        let mut factors = Vec::with_capacity(3);
        let mut issues = Vec::new();
        let (latencies, recent_alerts) = {
            let inner = self.lock();
            let alerts = inner.alerts.iter().filter(|a| a.timestamp_ms > since).count();
            (inner.recent(names::QUERY_LATENCY_MS, since), alerts)
        };

        if !latencies.is_empty() {
            let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
            factors.push(match avg {
                a if a < 50.0 => 1.0,
                a if a < 100.0 => 0.8,
                a if a < 200.0 => {
                    issues.push(format!("Average latency is {a:.1}ms"));
                    0.6
                }
                a => {
                    issues.push(format!("High latency: {a:.1}ms"));
                    0.3
                }
            });
        }

        factors.push(match recent_alerts {
            0 => 1.0,
            n if n < 5 => {
                issues.push(format!("{n} recent alerts"));
                0.7
            }
            n => {
                issues.push(format!("High alert rate: {n} alerts"));
                0.4
            }
        });

        let load = self.counters().concurrent;
        factors.push(match load {
            l if l < 10 => 1.0,
            l if l < 50 => 0.8,
            l => {
                issues.push(format!("High concurrent load: {l}"));
                0.5
            }
        });

        let score = factors.iter().sum::<f64>() / factors.len() as f64;
        let status = match score {
            s if s >= 0.9 => HealthStatus::Excellent,
            s if s >= 0.7 => HealthStatus::Good,
            s if s >= 0.5 => HealthStatus::Fair,
            _ => HealthStatus::Poor,
        };
        Health { score: (score * 100.0).round() / 100.0, status, issues, timestamp_ms: now }
    }
}
