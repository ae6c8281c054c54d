//! Render metrics and their Prometheus exposition.
//!
//! Latency histograms use fixed millisecond buckets. Everything is kept in
//! atomics so recording never blocks a render.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use ssr_runtime_core::PoolStats;

/// Upper bounds of the latency buckets in milliseconds. `+Inf` is implicit.
pub const LATENCY_BUCKETS_MS: [u64; 12] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Cumulative-on-export latency histogram.
#[derive(Debug)]
pub struct Histogram {
    // One counter per bucket plus the overflow bucket.
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    sum_us: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_us: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    /// Record one observation in microseconds.
    pub fn observe_us(&self, micros: u64) {
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| micros <= bound * 1000)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    /// Sum of observations in microseconds.
    pub fn sum_us(&self) -> u64 {
        self.sum_us.load(Ordering::Relaxed)
    }

    fn write_prometheus(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");

        let mut cumulative = 0;
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(&self.buckets) {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        if let Some(overflow) = self.buckets.last() {
            cumulative += overflow.load(Ordering::Relaxed);
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
        let _ = writeln!(out, "{name}_sum {:.3}", micros_to_ms(self.sum_us()));
        let _ = writeln!(out, "{name}_count {cumulative}");
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Per-phase durations of one request, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub acquire_us: u64,
    pub render_us: u64,
    pub wrap_us: u64,
    pub total_us: u64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_ok: u64,
    pub requests_fail: u64,
    pub render_errors: u64,
    pub render_timeouts: u64,
    pub pool_timeouts: u64,
    pub recycles: u64,
    pub renders: u64,
    pub avg_acquire_wait_ms: f64,
    pub avg_render_ms: f64,
    pub avg_request_ms: f64,
    pub avg_wrap_ms: f64,
}

/// Process-wide render metrics.
#[derive(Debug, Default)]
pub struct RenderMetrics {
    acquire_wait: Histogram,
    render_latency: Histogram,
    request_total: Histogram,
    requests_ok: AtomicU64,
    requests_fail: AtomicU64,
    render_errors: AtomicU64,
    render_timeouts: AtomicU64,
    pool_timeouts: AtomicU64,
    recycles: AtomicU64,
    renders: AtomicU64,
    total_wrap_us: AtomicU64,
    by_code: DashMap<u16, AtomicU64>,
}

impl RenderMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request and return the 1-based render index.
    pub fn record_success(&self, status: u16, timings: Timings) -> u64 {
        self.acquire_wait.observe_us(timings.acquire_us);
        self.render_latency.observe_us(timings.render_us);
        self.request_total.observe_us(timings.total_us);
        self.total_wrap_us.fetch_add(timings.wrap_us, Ordering::Relaxed);
        self.requests_ok.fetch_add(1, Ordering::Relaxed);
        self.count_code(status);
        self.renders.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a failed request.
    pub fn record_failure(&self, status: u16, timings: Timings) {
        self.acquire_wait.observe_us(timings.acquire_us);
        self.request_total.observe_us(timings.total_us);
        self.requests_fail.fetch_add(1, Ordering::Relaxed);
        self.render_errors.fetch_add(1, Ordering::Relaxed);
        self.count_code(status);
    }

    /// A render was aborted by the watchdog.
    pub fn note_render_timeout(&self) {
        self.render_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A request gave up waiting for a runtime.
    pub fn note_pool_timeout(&self) {
        self.pool_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A runtime was marked for replacement.
    pub fn note_recycle(&self) {
        self.recycles.fetch_add(1, Ordering::Relaxed);
    }

    fn count_code(&self, status: u16) {
        self.by_code
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Requests answered with `status`.
    pub fn requests_with_code(&self, status: u16) -> u64 {
        self.by_code
            .get(&status)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        #[allow(clippy::cast_precision_loss)]
        let average = |sum_us: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                micros_to_ms(sum_us) / count as f64
            }
        };
        let histogram_average = |h: &Histogram| average(h.sum_us(), h.count());
        let renders = self.renders.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_ok: self.requests_ok.load(Ordering::Relaxed),
            requests_fail: self.requests_fail.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            render_timeouts: self.render_timeouts.load(Ordering::Relaxed),
            pool_timeouts: self.pool_timeouts.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            renders,
            avg_acquire_wait_ms: histogram_average(&self.acquire_wait),
            avg_render_ms: histogram_average(&self.render_latency),
            avg_request_ms: histogram_average(&self.request_total),
            avg_wrap_ms: average(self.total_wrap_us.load(Ordering::Relaxed), renders),
        }
    }

    /// Prometheus text exposition, including the pool gauges.
    pub fn prometheus_text(&self, pool: &PoolStats) -> String {
        let mut out = String::with_capacity(4096);

        self.acquire_wait.write_prometheus(
            &mut out,
            "ssr_acquire_wait_ms",
            "Time spent waiting for a runtime in milliseconds.",
        );
        self.render_latency.write_prometheus(
            &mut out,
            "ssr_render_latency_ms",
            "Render call latency in milliseconds.",
        );
        self.request_total.write_prometheus(
            &mut out,
            "ssr_request_total_ms",
            "End-to-end render request latency in milliseconds.",
        );

        gauge(&mut out, "ssr_pool_in_use", "Runtimes currently leased.", pool.in_use);
        gauge(&mut out, "ssr_pool_size", "Configured runtime pool size.", pool.size);

        counter(
            &mut out,
            "ssr_render_timeouts_total",
            "Renders aborted by the watchdog.",
            self.render_timeouts.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "ssr_recycles_total",
            "Runtimes marked for replacement.",
            self.recycles.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "ssr_render_errors_total",
            "Failed render requests.",
            self.render_errors.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "ssr_pool_timeouts_total",
            "Requests that gave up waiting for a runtime.",
            self.pool_timeouts.load(Ordering::Relaxed),
        );

        let _ = writeln!(out, "# HELP ssr_requests_total Render requests by outcome.");
        let _ = writeln!(out, "# TYPE ssr_requests_total counter");
        let _ = writeln!(
            out,
            "ssr_requests_total{{status=\"ok\"}} {}",
            self.requests_ok.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "ssr_requests_total{{status=\"fail\"}} {}",
            self.requests_fail.load(Ordering::Relaxed)
        );

        let mut codes: Vec<(u16, u64)> = self
            .by_code
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        codes.sort_unstable_by_key(|(code, _)| *code);

        let _ = writeln!(out, "# HELP ssr_requests_by_code_total Render requests by HTTP status.");
        let _ = writeln!(out, "# TYPE ssr_requests_by_code_total counter");
        for (code, count) in codes {
            let _ = writeln!(out, "ssr_requests_by_code_total{{code=\"{code}\"}} {count}");
        }

        out
    }
}

fn gauge(out: &mut String, name: &str, help: &str, value: usize) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}
