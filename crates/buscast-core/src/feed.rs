//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Feed adapters producing batches of vehicle positions."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use buscast_common::config::FeedConfig;
use buscast_common::time::unix_timestamp;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::gtfs::decode_vehicle_positions;
use crate::model::{FeedSource, StopEvent, VehiclePosition};
use crate::route::RouteCatalog;
use crate::simulator::RouteSimulator;

/// Header carrying the feed API key.
pub const API_KEY_HEADER: &str = "api-key";

/// Positions produced by one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    pub positions: Vec<VehiclePosition>,
    pub stop_event: Option<StopEvent>,
}

/// Source of vehicle positions polled once per tick.
#[async_trait]
pub trait FeedAdapter: Send + Sync + 'static {
    fn source(&self) -> FeedSource;
    async fn fetch(&self) -> Result<FeedBatch, FetchError>;
}

/// Positions synthesized by one [`RouteSimulator`] per simulated vehicle.
#[derive(Debug)]
pub struct SimulatedFeed {
    simulators: Mutex<Vec<RouteSimulator>>,
}

impl SimulatedFeed {
    pub fn new(simulators: Vec<RouteSimulator>) -> Self {
        Self {
            simulators: Mutex::new(simulators),
        }
    }

    /// One simulator per declared vehicle. Vehicles sharing a route start spread
    /// evenly along its polyline.
    pub fn from_catalog(catalog: &RouteCatalog) -> Self {
        let mut simulators = Vec::new();
        for assignment in catalog.assignments() {
            let count = assignment.vehicle_ids.len();
            let len = assignment.route.waypoints().len();
            for (k, vehicle_id) in assignment.vehicle_ids.iter().enumerate() {
                let start = k * len / count;
                simulators.push(
                    RouteSimulator::new(vehicle_id.clone(), assignment.route.clone())
                        .with_start_index(start),
                );
            }
        }
        info!(vehicles = simulators.len(), "simulated feed prepared");
        Self::new(simulators)
    }

    pub fn vehicle_count(&self) -> usize {
        self.simulators.lock().len()
    }

    /// Advance every simulator once, stamping positions with `timestamp`.
    pub fn step_at(&self, timestamp: f64) -> FeedBatch {
        let mut simulators = self.simulators.lock();
        let mut batch = FeedBatch {
            positions: Vec::with_capacity(simulators.len()),
            stop_event: None,
        };
        for simulator in simulators.iter_mut() {
            let advance = simulator.advance_at(timestamp);
            if batch.stop_event.is_none() {
                batch.stop_event = advance.stop_event;
            }
            batch.positions.push(advance.position);
        }
        batch
    }
}

#[async_trait]
impl FeedAdapter for SimulatedFeed {
    fn source(&self) -> FeedSource {
        FeedSource::Demo
    }

    async fn fetch(&self) -> Result<FeedBatch, FetchError> {
        Ok(self.step_at(unix_timestamp()))
    }
}

/// Polls an external GTFS-realtime vehicle position feed.
#[derive(Debug, Clone)]
pub struct GtfsRealtimeFeed {
    client: reqwest::Client,
    url: String,
}

impl GtfsRealtimeFeed {
    pub fn new(url: impl Into<String>, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value =
                HeaderValue::from_str(key).context("gtfs api key is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build gtfs http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        Self::new(
            config.gtfs_url.trim(),
            config.api_key(),
            config.request_timeout,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedAdapter for GtfsRealtimeFeed {
    fn source(&self) -> FeedSource {
        FeedSource::Gtfs
    }

    async fn fetch(&self) -> Result<FeedBatch, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        let positions = decode_vehicle_positions(&body, unix_timestamp())?;
        debug!(bytes = body.len(), vehicles = positions.len(), "gtfs feed decoded");
        Ok(FeedBatch {
            positions,
            stop_event: None,
        })
    }
}

/// Build the adapter selected by `feed.use_simulation`.
///
/// `catalog` is required in simulation mode and ignored otherwise.
pub fn build_feed(
    config: &FeedConfig,
    catalog: Option<&RouteCatalog>,
) -> Result<Arc<dyn FeedAdapter>> {
    if config.use_simulation {
        let catalog = catalog.context("simulation mode requires a route catalog")?;
        Ok(Arc::new(SimulatedFeed::from_catalog(catalog)))
    } else {
        let feed = GtfsRealtimeFeed::from_config(config)?;
        info!(url = %feed.url(), "using gtfs-realtime feed");
        Ok(Arc::new(feed))
    }
}
