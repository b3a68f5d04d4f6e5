//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Position, stop, and broadcast payload data model."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// `last_stop_index` value before a vehicle has reached any stop.
pub const NO_STOP: i32 = -1;

fn no_stop() -> i32 {
    NO_STOP
}

/// Movement state reported with each position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VehicleStatus {
    Running,
    AtStop,
}

/// Which adapter produced a batch. Serialized as the payload `source` tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeedSource {
    /// Route simulator.
    Demo,
    /// External GTFS-realtime feed.
    Gtfs,
}

/// Latest observed position of one vehicle. Produced fresh every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    #[serde(rename = "bus_id")]
    pub vehicle_id: String,
    pub route_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees clockwise from north, `[0, 360)`.
    pub heading: f64,
    pub speed_kmh: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub status: VehicleStatus,
    /// Ordinal of the last stop reached, [`NO_STOP`] before the first.
    #[serde(default = "no_stop")]
    pub last_stop_index: i32,
}

/// Named stop aligned to a waypoint of its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub waypoint_idx: usize,
}

/// Arrival of a simulated vehicle at a stop during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lng: f64,
    /// Zero-based position of the stop in waypoint order.
    pub stop_index: usize,
    pub total_stops: usize,
}

/// Message pushed to subscribers: the priming snapshot and every tick batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub buses: Vec<VehiclePosition>,
    pub source: FeedSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_event: Option<StopEvent>,
}

impl BroadcastPayload {
    pub fn new(
        buses: Vec<VehiclePosition>,
        source: FeedSource,
        stop_event: Option<StopEvent>,
    ) -> Self {
        Self {
            buses,
            source,
            stop_event,
        }
    }

    /// Snapshot sent once to a subscriber on connect.
    pub fn priming(buses: Vec<VehiclePosition>, source: FeedSource) -> Self {
        Self::new(buses, source, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> VehiclePosition {
        VehiclePosition {
            vehicle_id: "DL-01".into(),
            route_name: "ISBT Kashmere Gate - AIIMS".into(),
            latitude: 28.6674,
            longitude: 77.2274,
            heading: 178.5,
            speed_kmh: 15.0,
            timestamp: 1_700_000_000.25,
            status: VehicleStatus::AtStop,
            last_stop_index: 0,
        }
    }

    #[test]
    fn position_uses_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["bus_id"], json!("DL-01"));
        assert_eq!(value["status"], json!("at_stop"));
        assert_eq!(value["speed_kmh"], json!(15.0));
        assert!(value["latitude"].is_number());
    }

    #[test]
    fn stop_event_is_omitted_when_absent() {
        let payload = BroadcastPayload::priming(vec![sample()], FeedSource::Demo);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["source"], json!("demo"));
        assert!(value.get("stop_event").is_none());

        let payload = BroadcastPayload::new(
            Vec::new(),
            FeedSource::Gtfs,
            Some(StopEvent {
                stop_name: "Lahori Gate".into(),
                stop_lat: 28.6503,
                stop_lng: 77.2301,
                stop_index: 2,
                total_stops: 15,
            }),
        );
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["source"], json!("gtfs"));
        assert_eq!(value["stop_event"]["stop_index"], json!(2));
    }

    #[test]
    fn missing_last_stop_index_defaults_to_none() {
        let position: VehiclePosition = serde_json::from_value(json!({
            "bus_id": "7",
            "route_name": "Unknown",
            "latitude": 1.0,
            "longitude": 2.0,
            "heading": 0.0,
            "speed_kmh": 0.0,
            "timestamp": 1.0,
            "status": "running"
        }))
        .unwrap();
        assert_eq!(position.last_stop_index, NO_STOP);
        assert_eq!(position.status.to_string(), "running");
    }
}
