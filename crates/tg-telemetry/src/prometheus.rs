// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prometheus text-format rendering of the metrics registry.
//!
//! Counters render as `counter` series; gauges as `gauge`; each histogram
//! renders its count and the read-time quantiles as suffixed gauges
//! (`_count`, `_avg`, `_p50`, `_p90`, `_p95`, `_p99`).

use crate::metrics::MetricsCollector;
use std::fmt::Write as _;

/// Sanitize a dotted metric name into a Prometheus identifier.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn render_labels(labels: &std::collections::BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let inner = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", sanitize(k), v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}

/// Render the whole registry in Prometheus text exposition format.
#[must_use]
pub fn render_prometheus(collector: &MetricsCollector) -> String {
    let (counters, histograms, gauges) = collector.export_keys();
    let mut out = String::new();
    let mut typed: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for (key, value) in counters {
        let name = sanitize(&key.name);
        if typed.insert(name.clone()) {
            let _ = writeln!(out, "# TYPE {name} counter");
        }
        let _ = writeln!(out, "{name}{} {value}", render_labels(&key.labels));
    }

    for (key, value) in gauges {
        let name = sanitize(&key.name);
        if typed.insert(name.clone()) {
            let _ = writeln!(out, "# TYPE {name} gauge");
        }
        let _ = writeln!(out, "{name}{} {value}", render_labels(&key.labels));
    }

    for (key, stats) in histograms {
        let base = sanitize(&key.name);
        let labels = render_labels(&key.labels);
        let series = [
            ("count", stats.count as f64),
            ("avg", stats.avg),
            ("p50", stats.p50),
            ("p90", stats.p90),
            ("p95", stats.p95),
            ("p99", stats.p99),
        ];
        for (suffix, value) in series {
            let name = format!("{base}_{suffix}");
            if typed.insert(name.clone()) {
                let _ = writeln!(out, "# TYPE {name} gauge");
            }
            let _ = writeln!(out, "{name}{labels} {value}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters_with_type_header() {
        let metrics = MetricsCollector::new();
        metrics.increment("http.requests", 7, &[("method", "POST")]);
        let text = render_prometheus(&metrics);
        assert!(text.contains("# TYPE http_requests counter"));
        assert!(text.contains("http_requests{method=\"POST\"} 7"));
    }

    #[test]
    fn renders_histogram_quantiles() {
        let metrics = MetricsCollector::new();
        metrics.observe("latency.ms", 5.0, &[]);
        metrics.observe("latency.ms", 15.0, &[]);
        let text = render_prometheus(&metrics);
        assert!(text.contains("latency_ms_count 2"));
        assert!(text.contains("latency_ms_avg 10"));
        assert!(text.contains("# TYPE latency_ms_p50 gauge"));
    }

    #[test]
    fn type_header_emitted_once_per_series() {
        let metrics = MetricsCollector::new();
        metrics.increment("hits", 1, &[("tool", "a")]);
        metrics.increment("hits", 1, &[("tool", "b")]);
        let text = render_prometheus(&metrics);
        assert_eq!(text.matches("# TYPE hits counter").count(), 1);
    }
}
