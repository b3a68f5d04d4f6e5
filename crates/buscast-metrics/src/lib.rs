//! ---
//! bc_section: "03-observability"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Metrics collection and export utilities."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::error;

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every metric family in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Option<String> {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => Some(body),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            None
        }
    }
}

/// Tick phase a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Fetch,
    Persist,
    Broadcast,
}

impl TickPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickPhase::Fetch => "fetch",
            TickPhase::Persist => "persist",
            TickPhase::Broadcast => "broadcast",
        }
    }
}

/// Metrics recorded by the tick scheduler and broadcast hub.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    registry: SharedRegistry,
    ticks_total: IntCounter,
    tick_failures: IntCounterVec,
    tick_seconds: Histogram,
    positions_written: IntCounter,
    deliveries_total: IntCounter,
    send_failures_total: IntCounter,
    subscribers_active: IntGauge,
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "buscast_ticks_total",
            "Scheduler iterations started",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let tick_failures = IntCounterVec::new(
            Opts::new(
                "buscast_tick_failures_total",
                "Tick phases that failed and were skipped",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(tick_failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "buscast_tick_duration_seconds",
                "Time spent in fetch, persist, and broadcast for one tick",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        let positions_written = IntCounter::with_opts(Opts::new(
            "buscast_positions_written_total",
            "Vehicle positions persisted to the snapshot store",
        ))?;
        registry.register(Box::new(positions_written.clone()))?;

        let deliveries_total = IntCounter::with_opts(Opts::new(
            "buscast_broadcast_deliveries_total",
            "Broadcast messages accepted by subscribers",
        ))?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let send_failures_total = IntCounter::with_opts(Opts::new(
            "buscast_broadcast_send_failures_total",
            "Subscribers dropped after a failed send",
        ))?;
        registry.register(Box::new(send_failures_total.clone()))?;

        let subscribers_active = IntGauge::with_opts(Opts::new(
            "buscast_subscribers_active",
            "Currently registered live subscribers",
        ))?;
        registry.register(Box::new(subscribers_active.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            tick_failures,
            tick_seconds,
            positions_written,
            deliveries_total,
            send_failures_total,
            subscribers_active,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_tick(&self) {
        self.ticks_total.inc();
    }

    pub fn record_failure(&self, phase: TickPhase) {
        self.tick_failures.with_label_values(&[phase.as_str()]).inc();
    }

    pub fn observe_tick(&self, seconds: f64) {
        self.tick_seconds.observe(seconds);
    }

    pub fn add_positions_written(&self, count: usize) {
        self.positions_written.inc_by(count as u64);
    }

    pub fn record_publish(&self, delivered: usize, failed: usize) {
        self.deliveries_total.inc_by(delivered as u64);
        self.send_failures_total.inc_by(failed as u64);
    }

    pub fn set_subscribers(&self, count: usize) {
        self.subscribers_active.set(count as i64);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_render_in_text_format() {
        let registry = new_registry();
        let metrics = EngineMetrics::new(registry.clone()).unwrap();
        metrics.inc_tick();
        metrics.record_failure(TickPhase::Fetch);
        metrics.record_publish(4, 1);
        metrics.set_subscribers(4);

        let body = encode_text(&registry).unwrap();
        assert!(body.contains("buscast_ticks_total 1"));
        assert!(body.contains("buscast_tick_failures_total{phase=\"fetch\"} 1"));
        assert!(body.contains("buscast_broadcast_send_failures_total 1"));
        assert!(body.contains("buscast_subscribers_active 4"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        EngineMetrics::new(registry.clone()).unwrap();
        assert!(EngineMetrics::new(registry).is_err());
    }
}
