//! ---
//! bc_section: "04-networking-external-interfaces"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "HTTP and WebSocket surface for live vehicle positions."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! REST snapshot endpoints, the `/ws/buses` live stream, and Prometheus exposition,
//! served from one axum router.

pub mod rest;
pub mod server;
pub mod websocket;

pub use rest::{BusesResponse, ServiceStatus, StopsResponse};
pub use server::{ApiServerBuilder, ApiServerHandle, ApiState};
