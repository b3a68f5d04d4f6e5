//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Expiring snapshot store of latest vehicle positions."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buscast_common::config::StoreConfig;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::error::StoreError;
use crate::model::VehiclePosition;
use crate::redis_store::RedisPositionStore;

/// Snapshot of the latest position per vehicle with per-record expiry.
#[async_trait]
pub trait PositionStore: Send + Sync + 'static {
    /// Upsert the vehicle's record and refresh its expiry.
    async fn write(&self, position: &VehiclePosition) -> Result<(), StoreError>;
    /// Every record that has not yet expired, ordered by vehicle id.
    async fn read_all(&self) -> Result<Vec<VehiclePosition>, StoreError>;
    /// Ids of every vehicle whose record has not yet expired.
    async fn live_ids(&self) -> Result<Vec<String>, StoreError>;
    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Store backends selectable through the `store.target` URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    /// `redis://` or `rediss://`.
    Redis,
}

impl StoreBackend {
    pub fn from_target(target: &str) -> Result<Self, StoreError> {
        let url = Url::parse(target).map_err(|_| StoreError::InvalidTarget(target.to_owned()))?;
        match url.scheme() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" | "rediss" => Ok(StoreBackend::Redis),
            other => Err(StoreError::UnsupportedBackend(other.to_owned())),
        }
    }
}

/// Open the store described by `config`. Remote backends connect before returning.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn PositionStore>, StoreError> {
    let ttl_secs = config.record_ttl.as_secs();
    match StoreBackend::from_target(&config.target)? {
        StoreBackend::Memory => {
            info!(ttl_secs, "using in-memory position store");
            Ok(Arc::new(MemoryPositionStore::new(config.record_ttl)))
        }
        StoreBackend::Redis => {
            let store = RedisPositionStore::connect(&config.target, config.record_ttl).await?;
            info!(ttl_secs, "using redis position store");
            Ok(Arc::new(store))
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    position: VehiclePosition,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<String, StoredRecord>,
    live: BTreeSet<String>,
    next_purge: Option<Instant>,
}

impl StoreInner {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.records.remove(id);
            self.live.remove(id);
        }
        expired.len()
    }
}

/// In-process store. Records expire `ttl` after their latest write.
///
/// Reads filter on the expiry deadline, so an expired record is never observed even
/// before the next purge removes it from the live index. Writes sweep expired records
/// at most once per `ttl`.
#[derive(Debug)]
pub struct MemoryPositionStore {
    ttl: Duration,
    inner: RwLock<StoreInner>,
}

impl MemoryPositionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every expired record and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.write().purge_expired(Instant::now())
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn write(&self, position: &VehiclePosition) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        if inner.next_purge.map_or(true, |due| now >= due) {
            let purged = inner.purge_expired(now);
            if purged > 0 {
                debug!(purged, "expired vehicle records removed");
            }
            inner.next_purge = Some(now + self.ttl);
        }
        inner.records.insert(
            position.vehicle_id.clone(),
            StoredRecord {
                position: position.clone(),
                expires_at: now + self.ttl,
            },
        );
        inner.live.insert(position.vehicle_id.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<VehiclePosition>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.read();
        Ok(inner
            .live
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.expires_at > now)
            .map(|record| record.position.clone())
            .collect())
    }

    async fn live_ids(&self) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.read();
        Ok(inner
            .live
            .iter()
            .filter(|id| {
                inner
                    .records
                    .get(*id)
                    .is_some_and(|record| record.expires_at > now)
            })
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
