//! ---
//! bc_section: "01-core-functionality"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Shared primitives and utilities for the core runtime."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds, DurationSecondsWithFrac};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_store_target() -> String {
    "memory://".to_owned()
}

fn default_record_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_use_simulation() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_route_file() -> PathBuf {
    PathBuf::from("data/routes/isbt-aiims.json")
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_subscriber_buffer() -> usize {
    32
}

fn default_send_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the BusCast daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and only defaults plus environment applied.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "BUSCAST_CONFIG";
    pub const ENV_PREFIX: &'static str = "BUSCAST";

    /// Load and validate configuration, respecting the `BUSCAST_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let config = Self::load_with_source(candidates)?.config;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// The first existing candidate file is layered under `BUSCAST__SECTION__KEY`
    /// environment variables. Missing files are not an error: the built-in defaults
    /// describe a runnable simulation setup. The result is not validated, so callers
    /// can apply command-line overrides before calling [`AppConfig::validate`].
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::layered(Some(&path))?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::layered(Some(&path))?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using defaults and environment");
        Ok(LoadedAppConfig {
            config: Self::layered(None)?,
            source: None,
        })
    }

    fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(config_path = %path.display(), "loading configuration");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("failed to read config file {}", path.display()),
                None => "failed to read configuration environment".to_owned(),
            })?;
        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| "failed to parse configuration")?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.feed.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Snapshot store connection settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store connection target: `memory://` or `redis://host:port/db`.
    #[serde(default = "default_store_target")]
    pub target: String,
    /// Seconds a position stays visible without a refreshing write.
    #[serde(default = "default_record_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub record_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            target: default_store_target(),
            record_ttl: default_record_ttl(),
        }
    }
}

impl StoreConfig {
    pub fn target_url(&self) -> Result<Url> {
        Url::parse(&self.target)
            .with_context(|| format!("invalid store target '{}'", self.target))
    }

    pub fn validate(&self) -> Result<()> {
        if self.record_ttl.is_zero() {
            return Err(anyhow!("store record_ttl must be greater than zero"));
        }
        self.target_url()?;
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Drive positions from the route simulator instead of the external feed.
    #[serde(default = "default_use_simulation")]
    pub use_simulation: bool,
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub tick_interval: Duration,
    #[serde(default)]
    pub gtfs_url: String,
    #[serde(default)]
    pub gtfs_api_key: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            use_simulation: default_use_simulation(),
            tick_interval: default_tick_interval(),
            gtfs_url: String::new(),
            gtfs_api_key: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl FeedConfig {
    /// API key, if one was configured.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.gtfs_api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("feed tick_interval must be greater than zero"));
        }
        if !self.use_simulation {
            if self.gtfs_url.trim().is_empty() {
                return Err(anyhow!(
                    "feed gtfs_url is required when use_simulation is disabled"
                ));
            }
            Url::parse(&self.gtfs_url)
                .with_context(|| format!("invalid feed gtfs_url '{}'", self.gtfs_url))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// JSON route file holding waypoints, stops, and simulated vehicle ids.
    #[serde(default = "default_route_file")]
    pub route_file: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            route_file: default_route_file(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// Outbound messages queued per subscriber before sends start failing.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_send_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub send_timeout_ms: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
            subscriber_buffer: default_subscriber_buffer(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer == 0 {
            return Err(anyhow!("api subscriber_buffer must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn defaults_describe_simulation_setup() {
        let config = AppConfig::default();
        assert!(config.feed.use_simulation);
        assert_eq!(config.store.record_ttl, Duration::from_secs(30));
        assert_eq!(config.feed.tick_interval, Duration::from_secs(5));
        assert_eq!(config.api.listen.port(), 8000);
        assert_eq!(config.store.target_url().unwrap().scheme(), "memory");
        config.validate().unwrap();
    }

    #[test]
    fn parses_fractional_tick_interval() {
        let config = AppConfig::from_str(
            r#"
            [feed]
            tick_interval = 2.5

            [store]
            record_ttl = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.feed.tick_interval, Duration::from_millis(2500));
        assert_eq!(config.store.record_ttl, Duration::from_secs(12));
    }

    #[test]
    fn external_feed_requires_url() {
        let err = AppConfig::from_str(
            r#"
            [feed]
            use_simulation = false
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("gtfs_url"));

        let config = AppConfig::from_str(
            r#"
            [feed]
            use_simulation = false
            gtfs_url = "https://example.invalid/vehicle-positions"
            gtfs_api_key = "  "
            "#,
        )
        .unwrap();
        assert_eq!(config.feed.api_key(), None);
    }

    #[test]
    fn rejects_zero_ttl() {
        assert!(AppConfig::from_str("[store]\nrecord_ttl = 0\n").is_err());
    }

    #[test]
    fn loads_first_existing_candidate() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[api]\nlisten = \"127.0.0.1:9100\"\nsubscriber_buffer = 4").unwrap();
        file.flush().unwrap();

        let missing = PathBuf::from("does/not/exist.toml");
        let loaded =
            AppConfig::load_with_source(&[missing, file.path().to_path_buf()]).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(file.path()));
        assert_eq!(loaded.config.api.listen.port(), 9100);
        assert_eq!(loaded.config.api.subscriber_buffer, 4);
    }

    #[test]
    fn validation_waits_for_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[feed]\nuse_simulation = false").unwrap();
        file.flush().unwrap();

        let loaded = AppConfig::load_with_source(&[file.path()]).unwrap();
        let mut config = loaded.config;
        assert!(!config.feed.use_simulation);
        assert!(config.validate().is_err());
        assert!(AppConfig::load(&[file.path()]).is_err());

        config.feed.use_simulation = true;
        config.validate().unwrap();
    }
}
