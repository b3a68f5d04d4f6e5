//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Fixed-interval fetch, persist, and broadcast loop."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use buscast_metrics::{EngineMetrics, TickPhase};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TickError;
use crate::feed::FeedAdapter;
use crate::hub::{BroadcastHub, PublishReport};
use crate::model::BroadcastPayload;
use crate::store::PositionStore;

/// Outcome of one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub positions: usize,
    pub persisted: usize,
    pub store_failures: usize,
    pub stop_event: bool,
    pub publish: PublishReport,
}

/// Drives the feed, store, and hub on a fixed sleep between ticks.
pub struct TickScheduler {
    feed: Arc<dyn FeedAdapter>,
    store: Arc<dyn PositionStore>,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    metrics: Option<EngineMetrics>,
}

impl TickScheduler {
    pub fn new(
        feed: Arc<dyn FeedAdapter>,
        store: Arc<dyn PositionStore>,
        hub: Arc<BroadcastHub>,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            hub,
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch one batch, persist every position, then broadcast the batch.
    ///
    /// Store failures are counted and logged; the batch is still broadcast.
    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.inc_tick();
        }

        let batch = match self.feed.fetch().await {
            Ok(batch) => batch,
            Err(err) => {
                self.record_failure(TickPhase::Fetch);
                return Err(err.into());
            }
        };

        if let Some(event) = &batch.stop_event {
            info!(
                stop_name = %event.stop_name,
                stop_index = event.stop_index,
                total_stops = event.total_stops,
                "vehicle reached stop {}/{}",
                event.stop_index + 1,
                event.total_stops
            );
        }

        let mut report = TickReport {
            positions: batch.positions.len(),
            stop_event: batch.stop_event.is_some(),
            ..TickReport::default()
        };
        for position in &batch.positions {
            match self.store.write(position).await {
                Ok(()) => report.persisted += 1,
                Err(err) => {
                    report.store_failures += 1;
                    warn!(vehicle = %position.vehicle_id, error = %err, "failed to persist position");
                }
            }
        }
        if report.store_failures > 0 {
            self.record_failure(TickPhase::Persist);
        }

        let payload =
            BroadcastPayload::new(batch.positions, self.feed.source(), batch.stop_event);
        report.publish = match self.hub.publish(&payload).await {
            Ok(publish) => publish,
            Err(err) => {
                self.record_failure(TickPhase::Broadcast);
                return Err(err.into());
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.add_positions_written(report.persisted);
            metrics.observe_tick(started.elapsed().as_secs_f64());
        }
        Ok(report)
    }

    /// Run ticks on a background task until the handle is shut down.
    ///
    /// The first tick runs immediately; each following tick starts `interval` after the
    /// previous one finished.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let source = self.feed.source();
        let task = tokio::spawn(async move {
            info!(source = %source, interval_ms = interval.as_millis() as u64, "tick scheduler started");
            let mut tick: u64 = 0;
            loop {
                tick += 1;
                match self.run_tick().await {
                    Ok(report) => debug!(
                        tick,
                        source = %source,
                        positions = report.positions,
                        subscribers = report.publish.delivered,
                        dropped = report.publish.failed,
                        "tick complete"
                    ),
                    Err(err) => warn!(tick, source = %source, error = %err, "tick skipped"),
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!(ticks = tick, "tick scheduler stopped");
        });
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn record_failure(&self, phase: TickPhase) {
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(phase);
        }
    }
}

/// Control handle for a spawned [`TickScheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("tick scheduler task panicked")?;
        Ok(())
    }
}
