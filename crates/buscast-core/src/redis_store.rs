//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Redis-backed expiring snapshot store."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
//! Each vehicle is a hash at `bus:<id>` carrying a key expiry, and `bus:active_ids`
//! indexes every id ever written. Redis only stores strings, so records are decoded
//! back into [`VehiclePosition`] here and nowhere else. Ids whose hash has expired are
//! pruned from the index on read.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{VehiclePosition, VehicleStatus, NO_STOP};
use crate::store::PositionStore;

/// Set of vehicle ids with a (possibly expired) record.
pub const LIVE_SET: &str = "bus:active_ids";

/// Hash key holding one vehicle's latest position.
pub fn record_key(vehicle_id: &str) -> String {
    format!("bus:{vehicle_id}")
}

/// Position store on a Redis server. Cloning the connection manager is cheap and
/// reconnects transparently after a dropped connection.
#[derive(Clone)]
pub struct RedisPositionStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl std::fmt::Debug for RedisPositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPositionStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisPositionStore {
    pub async fn connect(target: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(target)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn sorted_members(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = conn.smembers(LIVE_SET).await?;
        ids.sort();
        Ok(ids)
    }

    async fn forget(
        &self,
        conn: &mut ConnectionManager,
        ids: &[String],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        conn.srem::<_, _, ()>(LIVE_SET, ids).await?;
        debug!(pruned = ids.len(), "expired vehicle ids removed from live set");
        Ok(())
    }
}

#[async_trait]
impl PositionStore for RedisPositionStore {
    async fn write(&self, position: &VehiclePosition) -> Result<(), StoreError> {
        let key = record_key(&position.vehicle_id);
        let fields = encode_record(position);
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl.as_secs().max(1))
            .ignore()
            .sadd(LIVE_SET, &position.vehicle_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<VehiclePosition>, StoreError> {
        let mut conn = self.conn.clone();
        let ids = self.sorted_members(&mut conn).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(record_key(id));
        }
        let records: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut positions = Vec::with_capacity(ids.len());
        let mut expired = Vec::new();
        for (id, fields) in ids.iter().zip(records) {
            if fields.is_empty() {
                expired.push(id.clone());
                continue;
            }
            match decode_record(&record_key(id), &fields) {
                Ok(position) => positions.push(position),
                Err(err) => warn!(vehicle = %id, error = %err, "skipping malformed record"),
            }
        }
        self.forget(&mut conn, &expired).await?;
        Ok(positions)
    }

    async fn live_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let ids = self.sorted_members(&mut conn).await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.exists(record_key(id));
        }
        let present: Vec<bool> = pipe.query_async(&mut conn).await?;

        let (live, expired): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .zip(present)
            .partition(|(_, present)| *present);
        let expired: Vec<String> = expired.into_iter().map(|(id, _)| id).collect();
        self.forget(&mut conn, &expired).await?;
        Ok(live.into_iter().map(|(id, _)| id).collect())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Hash fields for one position. Numbers use Rust's shortest round-trip formatting.
pub fn encode_record(position: &VehiclePosition) -> Vec<(&'static str, String)> {
    vec![
        ("bus_id", position.vehicle_id.clone()),
        ("route_name", position.route_name.clone()),
        ("latitude", position.latitude.to_string()),
        ("longitude", position.longitude.to_string()),
        ("heading", position.heading.to_string()),
        ("speed_kmh", position.speed_kmh.to_string()),
        ("timestamp", position.timestamp.to_string()),
        ("status", position.status.as_ref().to_owned()),
        ("last_stop_index", position.last_stop_index.to_string()),
    ]
}

/// Decode a hash read from `key` back into a typed position.
pub fn decode_record(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<VehiclePosition, StoreError> {
    let text = |name: &str| {
        fields.get(name).ok_or_else(|| StoreError::Record {
            key: key.to_owned(),
            reason: format!("missing field '{name}'"),
        })
    };
    let number = |name: &str| -> Result<f64, StoreError> {
        let raw = text(name)?;
        raw.parse().map_err(|_| StoreError::Record {
            key: key.to_owned(),
            reason: format!("field '{name}' is not a number: '{raw}'"),
        })
    };

    let status_raw = text("status")?;
    let status = VehicleStatus::from_str(status_raw).map_err(|_| StoreError::Record {
        key: key.to_owned(),
        reason: format!("unknown status '{status_raw}'"),
    })?;
    let last_stop_index = match fields.get("last_stop_index") {
        Some(raw) => raw.parse::<i32>().map_err(|_| StoreError::Record {
            key: key.to_owned(),
            reason: format!("field 'last_stop_index' is not an integer: '{raw}'"),
        })?,
        None => NO_STOP,
    };

    Ok(VehiclePosition {
        vehicle_id: text("bus_id")?.clone(),
        route_name: text("route_name")?.clone(),
        latitude: number("latitude")?,
        longitude: number("longitude")?,
        heading: number("heading")?,
        speed_kmh: number("speed_kmh")?,
        timestamp: number("timestamp")?,
        status,
        last_stop_index,
    })
}
