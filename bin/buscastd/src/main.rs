//! ---
//! bc_section: "01-core-functionality"
//! bc_subsection: "binary"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Binary entrypoint for the BusCast daemon."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use buscast_common::config::AppConfig;
use buscast_common::logging::init_tracing;
use buscast_core::{
    build_feed, open_store, BroadcastHub, PositionService, RouteCatalog, TickScheduler,
};
use buscast_metrics::{new_registry, EngineMetrics};
use buscast_net::ApiServerBuilder;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "BusCast live vehicle position daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, conflicts_with = "gtfs", help = "Force the route simulator feed")]
    simulation: bool,

    #[arg(long, help = "Force the external GTFS-realtime feed")]
    gtfs: bool,

    #[arg(long, value_name = "ADDR", help = "Override the API listen address")]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the position engine and API server")]
    Run,
    #[command(about = "Load and validate configuration and route data, then exit")]
    CheckConfig,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if self.simulation {
            config.feed.use_simulation = true;
        }
        if self.gtfs {
            config.feed.use_simulation = false;
        }
        if let Some(listen) = self.listen {
            config.api.listen = listen;
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/buscast.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    cli.apply_overrides(&mut config)?;
    init_tracing("buscastd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running on defaults"),
    }

    let catalog = load_catalog(&config)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, catalog).await,
        Commands::CheckConfig => {
            let routes = catalog.as_ref().map_or(0, |c| c.assignments().len());
            let stops = catalog.as_ref().map_or(0, |c| c.stops().len());
            println!(
                "Configuration OK\nFeed: {}\nRoutes: {routes}\nStops: {stops}",
                if config.feed.use_simulation { "simulation" } else { "gtfs" }
            );
            Ok(())
        }
    }
}

/// The route file is required when simulating and optional otherwise, where it only
/// supplies `/api/stops`.
fn load_catalog(config: &AppConfig) -> Result<Option<RouteCatalog>> {
    let path = &config.simulation.route_file;
    if config.feed.use_simulation {
        let catalog = RouteCatalog::load(path)
            .with_context(|| format!("failed to load route file {}", path.display()))?;
        info!(route_file = %path.display(), routes = catalog.assignments().len(), "route file loaded");
        return Ok(Some(catalog));
    }
    if path.exists() {
        let catalog = RouteCatalog::load(path)
            .with_context(|| format!("failed to load route file {}", path.display()))?;
        return Ok(Some(catalog));
    }
    Ok(None)
}

async fn run_daemon(config: AppConfig, catalog: Option<RouteCatalog>) -> Result<()> {
    let registry = new_registry();
    let metrics = if config.metrics.enabled {
        Some(EngineMetrics::new(registry.clone())?)
    } else {
        info!("metrics disabled by configuration");
        None
    };

    let store = open_store(&config.store)
        .await
        .with_context(|| format!("failed to open position store {}", config.store.target))?;
    let feed = build_feed(&config.feed, catalog.as_ref())?;
    let mut hub = BroadcastHub::new();
    if let Some(metrics) = &metrics {
        hub = hub.with_metrics(metrics.clone());
    }
    let hub = Arc::new(hub);
    let stops = catalog.as_ref().map(RouteCatalog::stops).unwrap_or_default();
    let service = PositionService::new(store.clone(), hub.clone(), feed.source(), stops);

    let mut scheduler = TickScheduler::new(feed.clone(), store, hub, config.feed.tick_interval);
    if let Some(metrics) = &metrics {
        scheduler = scheduler.with_metrics(metrics.clone());
    }
    let scheduler = scheduler.spawn();

    let mut api = ApiServerBuilder::new(config.api.listen, service)
        .with_subscriber_limits(config.api.subscriber_buffer, config.api.send_timeout_ms);
    if metrics.is_some() {
        api = api.with_metrics_registry(registry);
    }
    let api = api
        .spawn()
        .await
        .with_context(|| format!("failed to bind api server on {}", config.api.listen))?;

    info!(source = %feed.source(), address = %api.local_addr(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    scheduler.shutdown().await?;
    api.shutdown().await?;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_flag_rescues_config_without_feed_url() {
        let mut config = AppConfig::default();
        config.feed.use_simulation = false;
        assert!(config.validate().is_err());

        let cli = Cli::parse_from(["buscastd", "--simulation", "--listen", "127.0.0.1:9000"]);
        cli.apply_overrides(&mut config).unwrap();
        assert!(config.feed.use_simulation);
        assert_eq!(config.api.listen.port(), 9000);
    }

    #[test]
    fn gtfs_flag_still_requires_url() {
        let mut config = AppConfig::default();
        let cli = Cli::parse_from(["buscastd", "--gtfs"]);
        assert!(cli.apply_overrides(&mut config).is_err());
    }
}
