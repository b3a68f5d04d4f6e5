//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Error taxonomy for the position distribution engine."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::path::PathBuf;

/// Failure to obtain a batch of positions from a feed. Skips one tick.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The feed did not answer within the configured request timeout.
    #[error("feed request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    /// Connection, TLS, or HTTP status failure.
    #[error("feed request failed: {0}")]
    Http(#[source] reqwest::Error),
    /// The response body was not a decodable feed message.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err)
        } else {
            FetchError::Http(err)
        }
    }
}

/// GTFS-realtime payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid gtfs-realtime payload: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// Snapshot store failures. Logged and skipped by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store target '{0}'")]
    InvalidTarget(String),
    #[error("unsupported store backend '{0}'")]
    UnsupportedBackend(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    /// A stored record could not be decoded back into a position.
    #[error("malformed record '{key}': {reason}")]
    Record { key: String, reason: String },
}

/// Per-subscriber delivery failure. Removes that subscriber only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("subscriber connection closed")]
    Closed,
    #[error("subscriber did not accept the message in time")]
    Timeout,
    #[error("subscriber transport failure: {0}")]
    Transport(String),
}

/// Route data rejected at load time.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unable to read route file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid route json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("route '{route}' needs at least 2 waypoints, found {found}")]
    TooFewWaypoints { route: String, found: usize },
    #[error("route '{route}' stop '{stop}' references waypoint {index} beyond {last}")]
    StopOutOfRange {
        route: String,
        stop: String,
        index: usize,
        last: usize,
    },
    #[error("route '{route}' has more than one stop at waypoint {index}")]
    DuplicateStop { route: String, index: usize },
    #[error("route '{0}' declares no vehicles")]
    NoVehicles(String),
    #[error("route file declares no routes")]
    Empty,
}

/// A single tick that could not complete; the scheduler logs it and sleeps.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to encode broadcast payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure to attach a new subscriber.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to encode priming message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] SendError),
}
