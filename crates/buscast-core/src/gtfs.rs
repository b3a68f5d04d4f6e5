//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "GTFS-realtime vehicle position decoding."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
//! Subset of the GTFS-realtime schema needed to read vehicle positions.
//!
//! Field tags follow `gtfs-realtime.proto`; unknown fields (trip updates, alerts,
//! extensions) are skipped by the decoder.

use prost::Message;

use crate::error::DecodeError;
use crate::model::{VehiclePosition, VehicleStatus, NO_STOP};

/// Route name reported when the feed omits the trip's route id.
pub const UNKNOWN_ROUTE: &str = "Unknown";

#[derive(Clone, PartialEq, Message)]
pub struct FeedMessage {
    #[prost(message, optional, tag = "1")]
    pub header: Option<FeedHeader>,
    #[prost(message, repeated, tag = "2")]
    pub entity: Vec<FeedEntity>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FeedHeader {
    #[prost(string, optional, tag = "1")]
    pub gtfs_realtime_version: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FeedEntity {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub is_deleted: Option<bool>,
    #[prost(message, optional, tag = "4")]
    pub vehicle: Option<VehiclePositionEntity>,
}

/// GTFS-realtime `VehiclePosition`.
#[derive(Clone, PartialEq, Message)]
pub struct VehiclePositionEntity {
    #[prost(message, optional, tag = "1")]
    pub trip: Option<TripDescriptor>,
    #[prost(message, optional, tag = "2")]
    pub position: Option<Position>,
    #[prost(uint32, optional, tag = "3")]
    pub current_stop_sequence: Option<u32>,
    #[prost(uint64, optional, tag = "5")]
    pub timestamp: Option<u64>,
    #[prost(string, optional, tag = "7")]
    pub stop_id: Option<String>,
    #[prost(message, optional, tag = "8")]
    pub vehicle: Option<VehicleDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TripDescriptor {
    #[prost(string, optional, tag = "1")]
    pub trip_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub route_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VehicleDescriptor {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub label: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Position {
    #[prost(float, optional, tag = "1")]
    pub latitude: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub longitude: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub bearing: Option<f32>,
    #[prost(double, optional, tag = "4")]
    pub odometer: Option<f64>,
    /// Metres per second.
    #[prost(float, optional, tag = "5")]
    pub speed: Option<f32>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Decode a serialized `FeedMessage` into one position per vehicle entity.
///
/// `now` stamps entities that carry no timestamp of their own.
pub fn decode_vehicle_positions(
    bytes: &[u8],
    now: f64,
) -> Result<Vec<VehiclePosition>, DecodeError> {
    let feed = FeedMessage::decode(bytes)?;
    Ok(feed
        .entity
        .iter()
        .filter(|entity| !entity.is_deleted.unwrap_or(false))
        .filter_map(|entity| map_entity(entity, now))
        .collect())
}

fn map_entity(entity: &FeedEntity, now: f64) -> Option<VehiclePosition> {
    let vehicle = entity.vehicle.as_ref()?;
    let vehicle_id = non_empty(vehicle.vehicle.as_ref().and_then(|v| v.id.as_ref()))
        .or_else(|| non_empty(entity.id.as_ref()))
        .unwrap_or_default()
        .to_owned();
    let route_name = non_empty(vehicle.trip.as_ref().and_then(|t| t.route_id.as_ref()))
        .unwrap_or(UNKNOWN_ROUTE)
        .to_owned();
    let position = vehicle.position.clone().unwrap_or_default();
    let timestamp = match vehicle.timestamp {
        Some(ts) if ts > 0 => ts as f64,
        _ => now,
    };

    Some(VehiclePosition {
        vehicle_id,
        route_name,
        latitude: f64::from(position.latitude.unwrap_or_default()),
        longitude: f64::from(position.longitude.unwrap_or_default()),
        heading: f64::from(position.bearing.unwrap_or_default()),
        speed_kmh: f64::from(position.speed.unwrap_or_default()) * 3.6,
        timestamp,
        status: VehicleStatus::Running,
        last_stop_index: NO_STOP,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, vehicle: VehiclePositionEntity) -> FeedEntity {
        FeedEntity {
            id: Some(id.into()),
            is_deleted: None,
            vehicle: Some(vehicle),
        }
    }

    #[test]
    fn maps_fully_populated_entity() {
        let feed = FeedMessage {
            header: Some(FeedHeader {
                gtfs_realtime_version: Some("2.0".into()),
                timestamp: Some(1_700_000_000),
            }),
            entity: vec![entity(
                "e1",
                VehiclePositionEntity {
                    trip: Some(TripDescriptor {
                        trip_id: Some("t1".into()),
                        route_id: Some("534".into()),
                    }),
                    position: Some(Position {
                        latitude: Some(28.5),
                        longitude: Some(77.25),
                        bearing: Some(90.0),
                        odometer: None,
                        speed: Some(10.0),
                    }),
                    timestamp: Some(1_700_000_123),
                    vehicle: Some(VehicleDescriptor {
                        id: Some("DL1PC0001".into()),
                        label: None,
                    }),
                    ..Default::default()
                },
            )],
        };

        let positions = decode_vehicle_positions(&feed.encode_to_vec(), 5.0).unwrap();
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.vehicle_id, "DL1PC0001");
        assert_eq!(p.route_name, "534");
        assert_eq!(p.latitude, 28.5);
        assert_eq!(p.heading, 90.0);
        assert_eq!(p.speed_kmh, 36.0);
        assert_eq!(p.timestamp, 1_700_000_123.0);
        assert_eq!(p.status, VehicleStatus::Running);
        assert_eq!(p.last_stop_index, NO_STOP);
    }

    #[test]
    fn applies_fallbacks_for_missing_fields() {
        let feed = FeedMessage {
            header: None,
            entity: vec![
                entity(
                    "entity-7",
                    VehiclePositionEntity {
                        vehicle: Some(VehicleDescriptor {
                            id: Some(String::new()),
                            label: Some("seven".into()),
                        }),
                        position: Some(Position {
                            latitude: Some(1.0),
                            longitude: Some(2.0),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ),
                FeedEntity {
                    id: Some("no-vehicle".into()),
                    ..Default::default()
                },
            ],
        };

        let positions = decode_vehicle_positions(&feed.encode_to_vec(), 42.5).unwrap();
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.vehicle_id, "entity-7");
        assert_eq!(p.route_name, UNKNOWN_ROUTE);
        assert_eq!(p.heading, 0.0);
        assert_eq!(p.speed_kmh, 0.0);
        assert_eq!(p.timestamp, 42.5);
    }

    #[test]
    fn skips_deleted_entities() {
        let mut deleted = entity("gone", VehiclePositionEntity::default());
        deleted.is_deleted = Some(true);
        let feed = FeedMessage {
            header: None,
            entity: vec![deleted],
        };
        assert!(decode_vehicle_positions(&feed.encode_to_vec(), 0.0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_vehicle_positions(b"\xff\xff\xff\xff", 0.0).is_err());
    }
}
