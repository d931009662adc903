//! Pipeline metrics
//!
//! Counters, gauges and a latency histogram shared by the transform units
//! of one sampling pipeline, exported in Prometheus text format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {0} {1}\n# TYPE {0} counter\n{0} {2}\n",
            self.name,
            self.help,
            self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {0} {1}\n# TYPE {0} gauge\n{0} {2}\n",
            self.name,
            self.help,
            self.get()
        )
    }
}

const LATENCY_BOUNDS: [f64; 10] = [0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0, 5.0];

/// Latency histogram with fixed second-valued buckets
pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BOUNDS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            buckets: Default::default(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        for (bound, bucket) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = format!("# HELP {0} {1}\n# TYPE {0} histogram\n", self.name, self.help);
        for (bound, bucket) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                bucket.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, self.count()));
        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));
        output
    }
}

/// Metrics of one sampling pipeline
pub struct PrelearnerMetrics {
    pub batches_processed: Counter,
    pub episodes_built: Counter,
    pub env_steps: Counter,
    pub modules_filtered: Counter,
    pub snapshot_swaps: Counter,
    pub active_units: Gauge,
    pub transform_latency: Histogram,
}

impl PrelearnerMetrics {
    pub fn new() -> Self {
        Self {
            batches_processed: Counter::new(
                "prelearner_batches_processed_total",
                "Raw batches turned into module-keyed batches",
            ),
            episodes_built: Counter::new("prelearner_episodes_total", "Episodes built from rows"),
            env_steps: Counter::new("prelearner_env_steps_total", "Environment steps emitted"),
            modules_filtered: Counter::new(
                "prelearner_modules_filtered_total",
                "Module sub-batches dropped by the module filter",
            ),
            snapshot_swaps: Counter::new(
                "prelearner_snapshot_swaps_total",
                "Module states replaced by a periodic resync",
            ),
            active_units: Gauge::new("prelearner_active_units", "Live transform units"),
            transform_latency: Histogram::new(
                "prelearner_transform_duration_seconds",
                "Latency of one transform unit invocation",
            ),
        }
    }

    pub fn to_prometheus(&self) -> String {
        [
            self.batches_processed.to_prometheus(),
            self.episodes_built.to_prometheus(),
            self.env_steps.to_prometheus(),
            self.modules_filtered.to_prometheus(),
            self.snapshot_swaps.to_prometheus(),
            self.active_units.to_prometheus(),
            self.transform_latency.to_prometheus(),
        ]
        .concat()
    }
}

impl Default for PrelearnerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
