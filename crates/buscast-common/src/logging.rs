//! ---
//! bc_section: "01-core-functionality"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Tracing setup shared by BusCast binaries."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter directive variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "BUSCAST_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards flush buffered lines on drop; they live as long as the process.
struct WriterGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

static GUARDS: OnceCell<WriterGuards> = OnceCell::new();

/// Stdout log format. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Pick the filter from `BUSCAST_LOG`, then `RUST_LOG`, then `info`. An unparsable
/// directive falls through to the next source.
pub fn resolve_filter(buscast_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    [buscast_log, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directive| match EnvFilter::try_new(directive) {
            Ok(filter) => Some(filter),
            Err(err) => {
                eprintln!("ignoring invalid log directive '{directive}': {err}");
                None
            }
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    let base = fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => base.with_target(false).json().with_writer(writer).boxed(),
        LogFormat::Pretty => base.with_writer(writer).boxed(),
    }
}

/// Install the global subscriber: `config.format` on stdout plus a daily rolling JSON
/// file `<prefix>.log` under `config.directory`. A second call is a no-op.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    if GUARDS.get().is_some() {
        return Ok(());
    }
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let (file_writer, file_guard) = tracing_appender::non_blocking(rolling::daily(
        &config.directory,
        format!("{prefix}.log"),
    ));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = resolve_filter(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
    );
    let file_layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer(config.format, stdout_writer))
        .with(file_layer)
        .try_init()
        .is_ok();
    let _ = GUARDS.set(WriterGuards {
        _stdout: stdout_guard,
        _file: file_guard,
    });

    if installed {
        info!(
            service = %service_name,
            log_dir = %config.directory.display(),
            format = ?config.format,
            "tracing initialised"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buscast_directive_wins_over_rust_log() {
        let filter = resolve_filter(Some("buscast_core=trace"), Some("warn"));
        assert_eq!(filter.to_string(), "buscast_core=trace");
    }

    #[test]
    fn invalid_directive_falls_through() {
        assert_eq!(resolve_filter(Some("buscast=loud"), Some("debug")).to_string(), "debug");
        assert_eq!(resolve_filter(None, Some("buscast=loud")).to_string(), "info");
        assert_eq!(resolve_filter(None, None).to_string(), "info");
    }

    #[test]
    fn log_format_uses_kebab_case() {
        #[derive(Deserialize)]
        struct Holder {
            format: LogFormat,
        }
        let holder: Holder = toml::from_str("format = \"pretty\"").unwrap();
        assert_eq!(holder.format, LogFormat::Pretty);
        let holder: Holder = toml::from_str("format = \"structured-json\"").unwrap();
        assert_eq!(holder.format, LogFormat::StructuredJson);
    }
}
