//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Position distribution engine."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
//! Position distribution engine: route simulation and GTFS-realtime feeds, the
//! expiring snapshot store, subscriber fan-out, and the tick scheduler tying them
//! together.

pub mod error;
pub mod feed;
pub mod gtfs;
pub mod hub;
pub mod model;
pub mod redis_store;
pub mod route;
pub mod scheduler;
pub mod service;
pub mod simulator;
pub mod store;

pub use error::{
    ConnectError, DecodeError, FetchError, RouteError, SendError, StoreError, TickError,
};
pub use feed::{build_feed, FeedAdapter, FeedBatch, GtfsRealtimeFeed, SimulatedFeed};
pub use hub::{
    keepalive_reply, BroadcastHub, ChannelSubscriber, PublishReport, Subscriber, SubscriberId,
};
pub use model::{
    BroadcastPayload, FeedSource, Stop, StopEvent, VehiclePosition, VehicleStatus, NO_STOP,
};
pub use route::{Route, RouteAssignment, RouteCatalog, RouteDefinition, Waypoint};
pub use scheduler::{SchedulerHandle, TickReport, TickScheduler};
pub use redis_store::RedisPositionStore;
pub use service::PositionService;
pub use simulator::{Advance, RouteSimulator};
pub use store::{open_store, MemoryPositionStore, PositionStore, StoreBackend};
