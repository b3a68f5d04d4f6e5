//! ---
//! bc_section: "01-core-functionality"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Shared primitives and utilities for the core runtime."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
//! Shared primitives for the BusCast workspace: layered configuration loading,
//! tracing initialisation, and wall-clock helpers.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, FeedConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    SimulationConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{round_to, unix_timestamp};
