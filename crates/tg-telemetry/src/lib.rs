// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! In-process observability plane: a metrics registry with counters,
//! histograms, and gauges; a Prometheus text exporter; and the
//! tracing-subscriber initialization used by the gateway binary.
//!
//! Counters are integers, histograms keep their raw observations and
//! compute percentiles at read time, gauges are floats. The registry is
//! process-global and initialized at startup.

/// Metrics registry and snapshot types.
pub mod metrics;
/// Prometheus text-format rendering of a metrics snapshot.
pub mod prometheus;

pub use metrics::{
    HistogramStats, MetricsCollector, MetricsSnapshot, Timer, global_metrics,
};
pub use prometheus::render_prometheus;

use tracing_subscriber::EnvFilter;

/// Initialize the process-wide tracing subscriber.
///
/// `filter` is an env-filter directive string (e.g. `"tg=info"`); the
/// `RUST_LOG` environment variable overrides it when set. With
/// `json = true` every log line is a single JSON object with the standard
/// field set, which is what production deployments scrape.
pub fn init_tracing(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
