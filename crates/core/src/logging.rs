//! Structured logging infrastructure for Datamesh.
//!
//! Both the platform and the domain binaries install a single subscriber at
//! startup. Library crates only emit `tracing` events.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::CoreError;

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Output format for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, one event per line
    #[default]
    Pretty,
    /// One JSON object per event, for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(CoreError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber in the requested format.
///
/// Returns an error when a subscriber is already installed, which lets tests
/// call this repeatedly without panicking.
pub fn try_init(format: LogFormat) -> Result<(), CoreError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    };
    result.map_err(|e| CoreError::Config(format!("logging already initialised: {e}")))
}

/// Initialize the logging system with human readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use datamesh_core::logging;
///
/// logging::init();
/// tracing::info!("Application started");
/// ```
pub fn init() {
    let _ = try_init(LogFormat::Pretty);
}

/// Initialize the logging system with JSON output.
///
/// # Example
/// ```no_run
/// use datamesh_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "platform", "Service started");
/// ```
pub fn init_json() {
    let _ = try_init(LogFormat::Json);
}
