// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thread-safe in-process metrics collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{OnceLock, RwLock};
use std::time::Instant;

// ── Keys ────────────────────────────────────────────────────────────────

/// A metric name plus its label set, with deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    /// Metric name (dotted, e.g. `tools.invocations`).
    pub name: String,
    /// Sorted label pairs.
    pub labels: BTreeMap<String, String>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Render `name{k="v",…}` for display and snapshot keys.
    #[must_use]
    pub fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{labels}}}", self.name)
    }
}

// ── Collector ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    counters: BTreeMap<MetricKey, u64>,
    histograms: BTreeMap<MetricKey, Vec<f64>>,
    gauges: BTreeMap<MetricKey, f64>,
}

/// Process-wide metrics collector.
///
/// Locks are held only for the duration of a single map operation; there
/// is no await inside any critical section.
pub struct MetricsCollector {
    inner: RwLock<Inner>,
    started_at: DateTime<Utc>,
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            started_at: Utc::now(),
        }
    }

    /// Increment a counter by `value`.
    pub fn increment(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        *inner.counters.entry(key).or_insert(0) += value;
    }

    /// Record one observation for a histogram.
    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        inner.histograms.entry(key).or_default().push(value);
    }

    /// Set a gauge.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        inner.gauges.insert(key, value);
    }

    /// Current value of a counter (0 when never incremented).
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        let inner = self.inner.read().expect("metrics registry poisoned");
        inner.counters.get(&key).copied().unwrap_or(0)
    }

    /// Percentile statistics for a histogram.
    #[must_use]
    pub fn histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> HistogramStats {
        let key = MetricKey::new(name, labels);
        let inner = self.inner.read().expect("metrics registry poisoned");
        inner
            .histograms
            .get(&key)
            .map(|values| HistogramStats::from_observations(values))
            .unwrap_or_default()
    }

    /// Current value of a gauge (0.0 when never set).
    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        let inner = self.inner.read().expect("metrics registry poisoned");
        inner.gauges.get(&key).copied().unwrap_or(0.0)
    }

    /// Point-in-time snapshot of every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().expect("metrics registry poisoned");
        MetricsSnapshot {
            counters: inner
                .counters
                .iter()
                .map(|(k, v)| (k.render(), *v))
                .collect(),
            histograms: inner
                .histograms
                .iter()
                .map(|(k, v)| (k.render(), HistogramStats::from_observations(v)))
                .collect(),
            gauges: inner.gauges.iter().map(|(k, v)| (k.render(), *v)).collect(),
            started_at: self.started_at,
        }
    }

    /// Snapshot with structured keys, used by the Prometheus renderer.
    #[must_use]
    pub fn export_keys(
        &self,
    ) -> (
        Vec<(MetricKey, u64)>,
        Vec<(MetricKey, HistogramStats)>,
        Vec<(MetricKey, f64)>,
    ) {
        let inner = self.inner.read().expect("metrics registry poisoned");
        (
            inner.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            inner
                .histograms
                .iter()
                .map(|(k, v)| (k.clone(), HistogramStats::from_observations(v)))
                .collect(),
            inner.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        )
    }

    /// Reset all metrics to empty.
    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        *inner = Inner::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-global collector, created on first use.
#[must_use]
pub fn global_metrics() -> &'static MetricsCollector {
    static GLOBAL: OnceLock<MetricsCollector> = OnceLock::new();
    GLOBAL.get_or_init(MetricsCollector::new)
}

// ── Histogram statistics ────────────────────────────────────────────────

/// Summary statistics for one histogram, computed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistogramStats {
    /// Number of observations.
    pub count: usize,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
    /// Arithmetic mean.
    pub avg: f64,
    /// 50th percentile.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl HistogramStats {
    /// Compute statistics from raw observations.
    #[must_use]
    pub fn from_observations(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            avg: sum / count as f64,
            p50: percentile(&sorted, 50),
            p90: percentile(&sorted, 90),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        }
    }
}

fn percentile(sorted: &[f64], pct: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() * pct / 100).min(sorted.len() - 1);
    sorted[index]
}

// ── Snapshot ────────────────────────────────────────────────────────────

/// Serializable point-in-time view of the registry, served on
/// `GET /metrics/json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values keyed by rendered metric name.
    pub counters: BTreeMap<String, u64>,
    /// Histogram statistics keyed by rendered metric name.
    pub histograms: BTreeMap<String, HistogramStats>,
    /// Gauge values keyed by rendered metric name.
    pub gauges: BTreeMap<String, f64>,
    /// When the collector was created.
    pub started_at: DateTime<Utc>,
}

// ── Timer ───────────────────────────────────────────────────────────────

/// Records elapsed milliseconds into a histogram when dropped.
pub struct Timer<'a> {
    collector: &'a MetricsCollector,
    name: String,
    labels: Vec<(String, String)>,
    start: Instant,
}

impl<'a> Timer<'a> {
    /// Start timing an operation.
    #[must_use]
    pub fn start(collector: &'a MetricsCollector, name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            collector,
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds so far.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        let labels: Vec<(&str, &str)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.collector
            .observe(&self.name, self.elapsed_ms(), &labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let metrics = MetricsCollector::new();
        metrics.increment("tools.invocations", 1, &[("tool", "search")]);
        metrics.increment("tools.invocations", 2, &[("tool", "search")]);
        metrics.increment("tools.invocations", 1, &[("tool", "get_work_item")]);

        assert_eq!(metrics.counter("tools.invocations", &[("tool", "search")]), 3);
        assert_eq!(
            metrics.counter("tools.invocations", &[("tool", "get_work_item")]),
            1
        );
        assert_eq!(metrics.counter("tools.invocations", &[]), 0);
    }

    #[test]
    fn histogram_percentiles_from_sorted_observations() {
        let metrics = MetricsCollector::new();
        for v in 1..=100 {
            metrics.observe("latency_ms", f64::from(v), &[]);
        }
        let stats = metrics.histogram_stats("latency_ms", &[]);
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p99, 100.0);
        assert!((stats.avg - 50.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_histogram_is_all_zero() {
        let metrics = MetricsCollector::new();
        let stats = metrics.histogram_stats("missing", &[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.p50, 0.0);
    }

    #[test]
    fn gauges_overwrite() {
        let metrics = MetricsCollector::new();
        metrics.set_gauge("connections", 3.0, &[]);
        metrics.set_gauge("connections", 5.0, &[]);
        assert!((metrics.gauge("connections", &[]) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_renders_labels_deterministically() {
        let metrics = MetricsCollector::new();
        metrics.increment("hits", 1, &[("b", "2"), ("a", "1")]);
        let snapshot = metrics.snapshot();
        assert!(snapshot.counters.contains_key("hits{a=\"1\",b=\"2\"}"));
    }

    #[test]
    fn timer_records_on_drop() {
        let metrics = MetricsCollector::new();
        {
            let _timer = Timer::start(&metrics, "op_ms", &[]);
        }
        assert_eq!(metrics.histogram_stats("op_ms", &[]).count, 1);
    }
}
