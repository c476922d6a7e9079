#![forbid(unsafe_code)]

// Swarm metrics — lock-free AtomicU64 counters and a Prometheus-compatible
// connect-latency histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Fixed histogram bucket boundaries for connect latency (microseconds
/// internally). Dialing a remote game server is slower than local message
/// handling, so the buckets run from 10ms up to 30s.
const BUCKET_BOUNDS_US: [u64; 9] = [
    10_000,      // 10ms
    25_000,      // 25ms
    50_000,      // 50ms
    100_000,     // 100ms
    250_000,     // 250ms
    1_000_000,   // 1s
    2_500_000,   // 2.5s
    10_000_000,  // 10s
    30_000_000,  // 30s
];

/// Prometheus-compatible cumulative histogram with fixed buckets.
pub struct Histogram {
    /// Cumulative bucket counters — bucket[i] counts observations <= BUCKET_BOUNDS_US[i]
    buckets: [AtomicU64; 9],
    /// +Inf bucket (total count)
    count: AtomicU64,
    /// Sum of all observations in microseconds
    sum_us: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    /// Record a duration observation.
    pub fn observe(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.sum_us.fetch_add(us, Relaxed);
        self.count.fetch_add(1, Relaxed);
        for (i, &bound) in BUCKET_BOUNDS_US.iter().enumerate() {
            if us <= bound {
                self.buckets[i].fetch_add(1, Relaxed);
            }
        }
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");

        let labels = [
            "0.01", "0.025", "0.05", "0.1", "0.25", "1", "2.5", "10", "30",
        ];
        for (i, label) in labels.iter().enumerate() {
            let val = self.buckets[i].load(Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{label}\"}} {val}");
        }
        let count = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let sum_us = self.sum_us.load(Relaxed);
        // Convert microseconds to seconds with 6 decimal places
        let _ = writeln!(out, "{name}_sum {}.{:06}", sum_us / 1_000_000, sum_us % 1_000_000);
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Process-wide metrics using lock-free atomics.
#[derive(Clone)]
pub struct SwarmMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    // Monotonic counters
    sessions_started_total: AtomicU64,
    sessions_stopped_total: AtomicU64,
    clients_scheduled_total: AtomicU64,
    clients_connected_total: AtomicU64,
    clients_failed_total: AtomicU64,
    clients_cancelled_total: AtomicU64,

    // Gauge
    clients_connected: AtomicU64,

    // Histogram
    connect_latency: Histogram,
}

impl SwarmMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions_started_total: AtomicU64::new(0),
                sessions_stopped_total: AtomicU64::new(0),
                clients_scheduled_total: AtomicU64::new(0),
                clients_connected_total: AtomicU64::new(0),
                clients_failed_total: AtomicU64::new(0),
                clients_cancelled_total: AtomicU64::new(0),
                clients_connected: AtomicU64::new(0),
                connect_latency: Histogram::new(),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_sessions_started(&self) {
        self.inner.sessions_started_total.fetch_add(1, Relaxed);
    }

    pub fn inc_sessions_stopped(&self) {
        self.inner.sessions_stopped_total.fetch_add(1, Relaxed);
    }

    pub fn add_clients_scheduled(&self, n: u64) {
        self.inner.clients_scheduled_total.fetch_add(n, Relaxed);
    }

    pub fn inc_clients_connected(&self) {
        self.inner.clients_connected_total.fetch_add(1, Relaxed);
    }

    pub fn inc_clients_failed(&self) {
        self.inner.clients_failed_total.fetch_add(1, Relaxed);
    }

    pub fn inc_clients_cancelled(&self) {
        self.inner.clients_cancelled_total.fetch_add(1, Relaxed);
    }

    // --- Gauge ---

    /// Increments the live-connection gauge and returns an RAII guard that
    /// decrements on drop. The gauge stays correct even when a client task
    /// is aborted mid-flight.
    pub fn connected_guard(&self) -> ConnectedGuard {
        self.inner.clients_connected.fetch_add(1, Relaxed);
        ConnectedGuard { inner: self.inner.clone() }
    }

    /// Currently held fake-player connections.
    pub fn clients_connected_now(&self) -> u64 {
        self.inner.clients_connected.load(Relaxed)
    }

    // --- Histogram ---

    pub fn observe_connect_latency(&self, duration: Duration) {
        self.inner.connect_latency.observe(duration);
    }

    // --- Prometheus rendering ---

    /// Render all metrics in Prometheus text exposition format.
    /// `session_active` is passed in from the controller (on-demand gauge).
    pub fn render_prometheus(&self, session_active: bool) -> String {
        let mut out = String::with_capacity(2048);

        let i = &self.inner;

        // Counters
        render_counter(&mut out, "mcswarm_sessions_started_total", "Total stress-test sessions started", i.sessions_started_total.load(Relaxed));
        render_counter(&mut out, "mcswarm_sessions_stopped_total", "Total stress-test sessions stopped", i.sessions_stopped_total.load(Relaxed));
        render_counter(&mut out, "mcswarm_clients_scheduled_total", "Total simulated clients scheduled", i.clients_scheduled_total.load(Relaxed));
        render_counter(&mut out, "mcswarm_clients_connected_total", "Total simulated clients that connected", i.clients_connected_total.load(Relaxed));
        render_counter(&mut out, "mcswarm_clients_failed_total", "Total simulated clients whose connection attempt failed", i.clients_failed_total.load(Relaxed));
        render_counter(&mut out, "mcswarm_clients_cancelled_total", "Total simulated clients cancelled before connecting", i.clients_cancelled_total.load(Relaxed));

        // Gauges
        render_gauge(&mut out, "mcswarm_clients_connected", "Currently held fake-player connections", i.clients_connected.load(Relaxed));
        render_gauge(&mut out, "mcswarm_session_active", "Whether a stress-test session is active", u64::from(session_active));

        // Histogram
        i.connect_latency.render(
            "mcswarm_connect_latency_seconds",
            "Simulated-client connect latency in seconds",
            &mut out,
        );

        out
    }
}

impl Default for SwarmMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements `clients_connected` on drop.
pub struct ConnectedGuard {
    inner: Arc<Inner>,
}

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        self.inner.clients_connected.fetch_sub(1, Relaxed);
    }
}

fn render_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
