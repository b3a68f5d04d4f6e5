//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Waypoint route simulator with stop arrival detection."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
//! Deterministic route simulator.
//!
//! Each call to [`RouteSimulator::advance`] reports the vehicle at its current
//! waypoint, then jumps up to [`LOOKAHEAD_WAYPOINTS`] waypoints ahead. Stops that
//! lie inside the jumped-over window fire an arrival event, at most one per call.
//! Reaching the final waypoint restarts the route on the next call.

use std::collections::HashSet;
use std::sync::Arc;

use buscast_common::time::{round_to, unix_timestamp};

use crate::model::{StopEvent, VehiclePosition, VehicleStatus, NO_STOP};
use crate::route::{Route, Waypoint};

/// Waypoints travelled per tick.
pub const LOOKAHEAD_WAYPOINTS: usize = 6;
/// Flat-earth conversion used for speed derivation.
pub const METERS_PER_DEGREE: f64 = 111_000.0;
/// Nominal seconds per tick used for speed derivation, independent of the
/// configured tick interval.
pub const NOMINAL_TICK_SECONDS: f64 = 5.0;
pub const MIN_SPEED_KMH: f64 = 15.0;
pub const MAX_SPEED_KMH: f64 = 45.0;

/// Heading from `from` to `to` in degrees, normalised into `[0, 360)`.
pub fn heading_degrees(from: Waypoint, to: Waypoint) -> f64 {
    let dlat = to[0] - from[0];
    let dlng = to[1] - from[1];
    normalize_heading(dlng.atan2(dlat).to_degrees())
}

/// Speed implied by covering the segment in one nominal tick, clamped.
pub fn segment_speed_kmh(from: Waypoint, to: Waypoint) -> f64 {
    let dlat = to[0] - from[0];
    let dlng = to[1] - from[1];
    let distance_m = dlat.hypot(dlng) * METERS_PER_DEGREE;
    (distance_m / NOMINAL_TICK_SECONDS * 3.6).clamp(MIN_SPEED_KMH, MAX_SPEED_KMH)
}

fn normalize_heading(degrees: f64) -> f64 {
    let heading = degrees.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360.0
    if heading >= 360.0 {
        0.0
    } else {
        heading
    }
}

/// Result of one simulator step.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub position: VehiclePosition,
    pub stop_event: Option<StopEvent>,
}

/// Simulation state for one vehicle looping along one route.
#[derive(Debug, Clone)]
pub struct RouteSimulator {
    vehicle_id: String,
    route: Arc<Route>,
    index: usize,
    visited: HashSet<usize>,
    last_stop_event: Option<StopEvent>,
    last_stop_ordinal: i32,
}

impl RouteSimulator {
    pub fn new(vehicle_id: impl Into<String>, route: Arc<Route>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            route,
            index: 0,
            visited: HashSet::new(),
            last_stop_event: None,
            last_stop_ordinal: NO_STOP,
        }
    }

    /// Start somewhere other than the first waypoint, clamped to the last one.
    pub fn with_start_index(mut self, index: usize) -> Self {
        self.index = index.min(self.route.last_index());
        self
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Current waypoint index, always within `[0, last_index]`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Stop event produced by the most recent advance.
    pub fn last_stop_event(&self) -> Option<&StopEvent> {
        self.last_stop_event.as_ref()
    }

    pub fn has_visited(&self, waypoint_idx: usize) -> bool {
        self.visited.contains(&waypoint_idx)
    }

    /// Advance one tick stamped with the current wall-clock time.
    pub fn advance(&mut self) -> Advance {
        self.advance_at(unix_timestamp())
    }

    /// Advance one tick stamped with `timestamp` (seconds since the epoch).
    pub fn advance_at(&mut self, timestamp: f64) -> Advance {
        let last = self.route.last_index();
        if self.index >= last {
            self.index = 0;
            self.visited.clear();
            self.last_stop_event = None;
            self.last_stop_ordinal = NO_STOP;
        }

        let start = self.index;
        let waypoints = self.route.waypoints();
        let here = waypoints[start];
        let next = waypoints[start + 1];
        let heading = heading_degrees(here, next);
        let speed = segment_speed_kmh(here, next);

        self.last_stop_event = None;
        let lookahead = (start + LOOKAHEAD_WAYPOINTS).min(last);
        for idx in start..=lookahead {
            let Some(ordinal) = self.route.stop_ordinal_at(idx) else {
                continue;
            };
            if !self.visited.insert(idx) {
                continue;
            }
            let stop = &self.route.stops()[ordinal];
            self.last_stop_event = Some(StopEvent {
                stop_name: stop.name.clone(),
                stop_lat: waypoints[idx][0],
                stop_lng: waypoints[idx][1],
                stop_index: ordinal,
                total_stops: self.route.stops().len(),
            });
            self.last_stop_ordinal = ordinal as i32;
            break;
        }

        self.index = lookahead;

        let status = if self.last_stop_event.is_some() {
            VehicleStatus::AtStop
        } else {
            VehicleStatus::Running
        };

        Advance {
            position: VehiclePosition {
                vehicle_id: self.vehicle_id.clone(),
                route_name: self.route.name().to_owned(),
                latitude: round_to(here[0], 6),
                longitude: round_to(here[1], 6),
                heading: normalize_heading(round_to(heading, 1)),
                speed_kmh: round_to(speed, 1),
                timestamp,
                status,
                last_stop_index: self.last_stop_ordinal,
            },
            stop_event: self.last_stop_event.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stop;

    fn stop(name: &str, idx: usize) -> Stop {
        Stop {
            name: name.into(),
            lat: 0.0,
            lng: 0.0,
            waypoint_idx: idx,
        }
    }

    fn straight_route(len: usize, stops: Vec<Stop>) -> Arc<Route> {
        let waypoints = (0..len).map(|i| [i as f64 * 0.0001, 0.0]).collect();
        Arc::new(Route::new("line", waypoints, stops).unwrap())
    }

    #[test]
    fn two_waypoint_route_advances_then_loops() {
        let route = Arc::new(
            Route::new("diag", vec![[0.0, 0.0], [0.001, 0.001]], Vec::new()).unwrap(),
        );
        let mut sim = RouteSimulator::new("bus-1", route);

        let first = sim.advance_at(100.0);
        assert_eq!(first.position.latitude, 0.0);
        assert_eq!(first.position.longitude, 0.0);
        assert_eq!(first.position.heading, 45.0);
        assert_eq!(first.position.status, VehicleStatus::Running);
        assert_eq!(first.position.timestamp, 100.0);
        assert!(first.stop_event.is_none());
        assert_eq!(sim.index(), 1);

        let second = sim.advance_at(105.0);
        assert_eq!(second.position.latitude, 0.0);
        assert_eq!(second.position.longitude, 0.0);
        assert_eq!(sim.index(), 1);
    }

    #[test]
    fn index_advances_six_waypoints_per_tick_until_capped() {
        let mut sim = RouteSimulator::new("bus-1", straight_route(40, Vec::new()));
        let last = 39;
        for n in 1..=6 {
            sim.advance_at(0.0);
            assert_eq!(sim.index(), (6 * n).min(last));
        }
        sim.advance_at(0.0);
        assert_eq!(sim.index(), last);
    }

    #[test]
    fn reports_pre_advance_waypoint() {
        let mut sim = RouteSimulator::new("bus-1", straight_route(20, Vec::new()));
        sim.advance_at(0.0);
        let second = sim.advance_at(0.0);
        assert_eq!(second.position.latitude, round_to(6.0 * 0.0001, 6));
    }

    #[test]
    fn stop_fires_once_per_lap() {
        let mut sim = RouteSimulator::new("bus-1", straight_route(10, vec![stop("Gate", 3)]));

        let first = sim.advance_at(0.0);
        let event = first.stop_event.expect("stop inside first window");
        assert_eq!(event.stop_name, "Gate");
        assert_eq!(event.stop_index, 0);
        assert_eq!(event.total_stops, 1);
        assert_eq!(event.stop_lat, 3.0 * 0.0001);
        assert_eq!(first.position.status, VehicleStatus::AtStop);
        assert_eq!(first.position.last_stop_index, 0);
        assert!(sim.has_visited(3));
        assert_eq!(sim.index(), 6);

        let second = sim.advance_at(0.0);
        assert!(second.stop_event.is_none());
        assert_eq!(second.position.status, VehicleStatus::Running);
        assert_eq!(sim.index(), 9);

        let third = sim.advance_at(0.0);
        assert!(sim.has_visited(3));
        assert_eq!(third.stop_event.map(|e| e.stop_name), Some("Gate".to_owned()));
        assert_eq!(sim.index(), 6);
    }

    #[test]
    fn at_most_one_stop_per_advance() {
        let mut sim = RouteSimulator::new(
            "bus-1",
            straight_route(30, vec![stop("A", 1), stop("B", 2), stop("C", 5)]),
        );

        let fired: Vec<_> = (0..3)
            .map(|_| sim.advance_at(0.0).stop_event.map(|e| e.stop_name))
            .collect();
        assert_eq!(fired[0].as_deref(), Some("A"));
        // B and C were skipped over by the first jump and are never revisited this lap.
        assert_eq!(fired[1], None);
        assert_eq!(fired[2], None);
        assert!(sim.has_visited(1));
        assert!(!sim.has_visited(2));
    }

    #[test]
    fn stop_event_clears_on_following_tick() {
        let mut sim = RouteSimulator::new("bus-1", straight_route(30, vec![stop("A", 0)]));
        sim.advance_at(0.0);
        assert!(sim.last_stop_event().is_some());
        sim.advance_at(0.0);
        assert!(sim.last_stop_event().is_none());
    }

    #[test]
    fn last_stop_index_tracks_and_resets_on_loop() {
        let mut sim = RouteSimulator::new("bus-1", straight_route(20, vec![stop("Mid", 10)]));
        let observed: Vec<i32> = (0..5)
            .map(|_| sim.advance_at(0.0).position.last_stop_index)
            .collect();
        assert_eq!(observed, [NO_STOP, 0, 0, 0, NO_STOP]);
    }

    #[test]
    fn heading_and_speed_stay_within_bounds() {
        let waypoints = vec![
            [0.0, 0.0],
            [0.0, -0.00001],
            [-0.5, -0.5],
            [-0.5, -0.5],
            [-0.4999999, -0.5000001],
            [0.2, 0.9],
            [0.2, 0.9000001],
        ];
        let route = Arc::new(Route::new("zigzag", waypoints, Vec::new()).unwrap());
        for start in 0..route.last_index() {
            let mut sim = RouteSimulator::new("bus-1", route.clone()).with_start_index(start);
            let position = sim.advance_at(0.0).position;
            assert!((0.0..360.0).contains(&position.heading), "{}", position.heading);
            assert!((MIN_SPEED_KMH..=MAX_SPEED_KMH).contains(&position.speed_kmh));
        }
    }

    #[test]
    fn heading_is_compass_bearing() {
        let cases = [
            ([1.0, 0.0], 0.0),
            ([0.0, 1.0], 90.0),
            ([-1.0, 0.0], 180.0),
            ([0.0, -1.0], 270.0),
        ];
        for (to, expected) in cases {
            let heading = heading_degrees([0.0, 0.0], to);
            assert!((heading - expected).abs() < 1e-9, "{to:?} -> {heading}");
        }
        assert_eq!(normalize_heading(-1e-20), 0.0);
        assert_eq!(normalize_heading(360.0), 0.0);
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(segment_speed_kmh([0.0, 0.0], [0.0, 0.0]), MIN_SPEED_KMH);
        assert_eq!(segment_speed_kmh([0.0, 0.0], [0.01, 0.0]), MAX_SPEED_KMH);
        // 0.0001 deg ~ 11.1 m -> 7.99 km/h, below the floor
        assert_eq!(segment_speed_kmh([0.0, 0.0], [0.0001, 0.0]), MIN_SPEED_KMH);
        // 0.0005 deg ~ 55.5 m -> 39.96 km/h
        let mid = segment_speed_kmh([0.0, 0.0], [0.0005, 0.0]);
        assert!((mid - 39.96).abs() < 1e-9);
    }
}
