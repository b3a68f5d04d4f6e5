//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Route polylines, stops, and route file loading."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RouteError;
use crate::model::Stop;

/// `[latitude, longitude]` in degrees.
pub type Waypoint = [f64; 2];

/// Route entry as written in the route file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    #[serde(default)]
    pub vehicle_ids: Vec<String>,
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub stops: Vec<Stop>,
}

/// Validated polyline with its stops in waypoint order.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    waypoints: Vec<Waypoint>,
    stops: Vec<Stop>,
    stop_ordinals: HashMap<usize, usize>,
}

impl Route {
    /// Build a route, rejecting polylines shorter than two waypoints and stops that
    /// point outside the polyline or share a waypoint.
    pub fn new(
        name: impl Into<String>,
        waypoints: Vec<Waypoint>,
        mut stops: Vec<Stop>,
    ) -> Result<Self, RouteError> {
        let name = name.into();
        if waypoints.len() < 2 {
            return Err(RouteError::TooFewWaypoints {
                route: name,
                found: waypoints.len(),
            });
        }
        let last = waypoints.len() - 1;
        stops.sort_by_key(|stop| stop.waypoint_idx);

        let mut stop_ordinals = HashMap::with_capacity(stops.len());
        for (ordinal, stop) in stops.iter().enumerate() {
            if stop.waypoint_idx > last {
                return Err(RouteError::StopOutOfRange {
                    route: name,
                    stop: stop.name.clone(),
                    index: stop.waypoint_idx,
                    last,
                });
            }
            if stop_ordinals.insert(stop.waypoint_idx, ordinal).is_some() {
                return Err(RouteError::DuplicateStop {
                    route: name,
                    index: stop.waypoint_idx,
                });
            }
        }

        Ok(Self {
            name,
            waypoints,
            stops,
            stop_ordinals,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Stops ordered by waypoint index.
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn last_index(&self) -> usize {
        self.waypoints.len() - 1
    }

    /// Ordinal of the stop aligned to `waypoint_idx`, if any.
    pub fn stop_ordinal_at(&self, waypoint_idx: usize) -> Option<usize> {
        self.stop_ordinals.get(&waypoint_idx).copied()
    }
}

/// A route together with the vehicles simulated on it.
#[derive(Debug, Clone)]
pub struct RouteAssignment {
    pub route: Arc<Route>,
    pub vehicle_ids: Vec<String>,
}

/// All routes declared in a route file, in file order.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    assignments: Vec<RouteAssignment>,
}

impl RouteCatalog {
    pub fn load(path: &Path) -> Result<Self, RouteError> {
        let contents = fs::read_to_string(path).map_err(|source| RouteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&contents)?;
        debug!(path = %path.display(), routes = catalog.assignments.len(), "route file loaded");
        Ok(catalog)
    }

    pub fn from_json(contents: &str) -> Result<Self, RouteError> {
        let definitions: IndexMap<String, RouteDefinition> = serde_json::from_str(contents)?;
        if definitions.is_empty() {
            return Err(RouteError::Empty);
        }
        let mut assignments = Vec::with_capacity(definitions.len());
        for (name, definition) in definitions {
            if definition.vehicle_ids.is_empty() {
                return Err(RouteError::NoVehicles(name));
            }
            let route = Route::new(name, definition.waypoints, definition.stops)?;
            assignments.push(RouteAssignment {
                route: Arc::new(route),
                vehicle_ids: definition.vehicle_ids,
            });
        }
        Ok(Self { assignments })
    }

    pub fn assignments(&self) -> &[RouteAssignment] {
        &self.assignments
    }

    /// Stops of every route, each route's stops in waypoint order.
    pub fn stops(&self) -> Vec<Stop> {
        self.assignments
            .iter()
            .flat_map(|assignment| assignment.route.stops().iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stop(name: &str, idx: usize) -> Stop {
        Stop {
            name: name.into(),
            lat: 0.0,
            lng: 0.0,
            waypoint_idx: idx,
        }
    }

    #[test]
    fn stops_are_sorted_by_waypoint() {
        let route = Route::new(
            "loop",
            vec![[0.0, 0.0]; 10],
            vec![stop("c", 8), stop("a", 1), stop("b", 4)],
        )
        .unwrap();
        let names: Vec<_> = route.stops().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(route.stop_ordinal_at(4), Some(1));
        assert_eq!(route.stop_ordinal_at(5), None);
        assert_eq!(route.last_index(), 9);
    }

    #[test]
    fn rejects_short_polylines() {
        let err = Route::new("tiny", vec![[0.0, 0.0]], Vec::new()).unwrap_err();
        assert!(matches!(err, RouteError::TooFewWaypoints { found: 1, .. }));
    }

    #[test]
    fn rejects_bad_stops() {
        let err = Route::new("r", vec![[0.0, 0.0]; 3], vec![stop("far", 3)]).unwrap_err();
        assert!(matches!(err, RouteError::StopOutOfRange { index: 3, last: 2, .. }));

        let err =
            Route::new("r", vec![[0.0, 0.0]; 3], vec![stop("x", 1), stop("y", 1)]).unwrap_err();
        assert!(matches!(err, RouteError::DuplicateStop { index: 1, .. }));
    }

    #[test]
    fn catalog_preserves_file_order_and_vehicles() {
        // raw text: `json!` would sort the keys
        let contents = r#"{
            "Second": {
                "vehicle_ids": ["B-1", "B-2"],
                "waypoints": [[0.0, 0.0], [0.0, 0.001]],
                "stops": [{"name": "End", "lat": 0.0, "lng": 0.001, "waypoint_idx": 1}]
            },
            "First": {
                "vehicle_ids": ["A-1"],
                "waypoints": [[1.0, 1.0], [1.001, 1.0]]
            }
        }"#;
        let catalog = RouteCatalog::from_json(contents).unwrap();
        let names: Vec<_> = catalog
            .assignments()
            .iter()
            .map(|a| a.route.name().to_owned())
            .collect();
        assert_eq!(names, ["Second", "First"]);
        assert_eq!(catalog.assignments()[0].vehicle_ids, ["B-1", "B-2"]);
        assert_eq!(catalog.stops().len(), 1);
    }

    #[test]
    fn catalog_requires_vehicles() {
        let contents = json!({
            "Lonely": {"waypoints": [[0.0, 0.0], [0.0, 1.0]]}
        })
        .to_string();
        assert!(matches!(
            RouteCatalog::from_json(&contents),
            Err(RouteError::NoVehicles(name)) if name == "Lonely"
        ));
        assert!(matches!(RouteCatalog::from_json("{}"), Err(RouteError::Empty)));
    }
}
