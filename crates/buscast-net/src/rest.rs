//! ---
//! bc_section: "04-networking-external-interfaces"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "REST snapshot and metrics endpoints."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use buscast_core::{Stop, VehiclePosition};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::server::ApiState;

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    /// Always `running` while the server answers.
    pub status: String,
    /// Service identifier.
    pub service: String,
}

/// Body of `GET /api/buses`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusesResponse {
    /// Every vehicle whose record has not expired.
    pub buses: Vec<VehiclePosition>,
    /// Number of entries in `buses`.
    pub count: usize,
}

/// Body of `GET /api/stops`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopsResponse {
    /// Configured stops in waypoint order.
    pub stops: Vec<Stop>,
}

pub(crate) async fn get_root() -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "running".into(),
        service: "buscast".into(),
    })
}

pub(crate) async fn get_buses(State(state): State<Arc<ApiState>>) -> Response {
    match state.service.snapshot().await {
        Ok(buses) => Json(BusesResponse {
            count: buses.len(),
            buses,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "snapshot read failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

pub(crate) async fn get_stops(State(state): State<Arc<ApiState>>) -> Json<StopsResponse> {
    Json(StopsResponse {
        stops: state.service.stops().to_vec(),
    })
}

pub(crate) async fn get_metrics(State(state): State<Arc<ApiState>>) -> Response {
    let Some(registry) = &state.metrics else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };
    match buscast_metrics::encode_text(registry) {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
