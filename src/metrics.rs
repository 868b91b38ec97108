//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Listener and registry
    pub migrations_seen: IntCounter,
    pub candidates_registered: IntCounter,
    pub candidates_expired: IntCounter,
    pub stream_reconnects: IntCounter,

    // Reconciler
    pub pools_scanned: IntCounter,
    pub pools_qualified: IntCounter,
    pub pools_rejected: IntCounter,
    pub reconcile_ticks_skipped: IntCounter,

    // Orchestrator
    pub purchases_ok: IntCounter,
    pub purchases_failed: IntCounter,
    pub purchases_skipped: IntCounter,
    pub positions_ok: IntCounter,
    pub positions_warned: IntCounter,
    pub positions_failed: IntCounter,

    pub notifications_failed: IntCounter,
    pub rpc_rate_limited: IntCounter,

    // Gauges
    pub pending_candidates: IntGauge,
    pub in_flight_actions: IntGauge,

    // Histograms
    pub tick_latency: Histogram,
    pub action_latency: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> prometheus::Result<Histogram> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))?;
    registry.register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("gradwatch".to_string()), None)?;
        let r = &registry;

        Ok(Self {
            migrations_seen: counter(r, "migrations_seen_total", "Migration events emitted by the listener")?,
            candidates_registered: counter(r, "candidates_registered_total", "Candidates added to the registry")?,
            candidates_expired: counter(r, "candidates_expired_total", "Candidates dropped on TTL expiry")?,
            stream_reconnects: counter(r, "stream_reconnects_total", "Log subscription reconnects")?,
            pools_scanned: counter(r, "pools_scanned_total", "Pools fetched and decoded by the reconciler")?,
            pools_qualified: counter(r, "pools_qualified_total", "Pools accepted by the qualifier")?,
            pools_rejected: counter(r, "pools_rejected_total", "Pools rejected by the qualifier")?,
            reconcile_ticks_skipped: counter(
                r,
                "reconcile_ticks_skipped_total",
                "Ticks skipped because the previous one was still running",
            )?,
            purchases_ok: counter(r, "purchases_ok_total", "Confirmed token purchases")?,
            purchases_failed: counter(r, "purchases_failed_total", "Purchases that failed after all attempts")?,
            purchases_skipped: counter(r, "purchases_skipped_total", "Purchases skipped because the token was held")?,
            positions_ok: counter(r, "positions_ok_total", "Liquidity positions created")?,
            positions_warned: counter(
                r,
                "positions_warned_total",
                "Positions created with a non-critical instruction failure",
            )?,
            positions_failed: counter(r, "positions_failed_total", "Liquidity attempts that failed")?,
            notifications_failed: counter(r, "notifications_failed_total", "Notification deliveries that failed")?,
            rpc_rate_limited: counter(r, "rpc_rate_limited_total", "Rate-limited external calls that were retried")?,
            pending_candidates: gauge(r, "pending_candidates", "Candidates currently in the registry")?,
            in_flight_actions: gauge(r, "in_flight_actions", "Actions currently executing")?,
            tick_latency: histogram(
                r,
                "reconcile_tick_seconds",
                "Reconciliation tick duration",
                vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
            )?,
            action_latency: histogram(
                r,
                "action_seconds",
                "End-to-end action duration",
                vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
            )?,
            registry,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Records elapsed time into a histogram when finished
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe_duration(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
