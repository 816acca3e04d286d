//! Configuration management for Datamesh.
//!
//! Both processes read an optional TOML file; command line flags are applied
//! on top by the binaries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Well-known platform port.
pub const DEFAULT_PLATFORM_PORT: u16 = 9000;

/// Number of most recent audit entries scanned for zero-trust evidence.
pub const DEFAULT_AUDIT_SCAN_WINDOW: usize = 10_000;

/// Platform (coordinator) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    /// Listen address for the gateway
    pub bind_address: String,
    /// Require logged `Hello` evidence before discover/consume
    pub zero_trust: bool,
    /// Registry JSON file; in-memory when unset
    pub registry_path: Option<PathBuf>,
    /// Audit log file; in-memory when unset
    pub audit_log_path: Option<PathBuf>,
    /// Recency bound for audit scans; unbounded when unset
    pub audit_scan_window: Option<usize>,
    /// Per-frame read/write deadline in seconds
    pub io_timeout_secs: u64,
    /// Records not refreshed within this many seconds are evicted
    pub lease_ttl_secs: u64,
    /// Interval between lease sweeps in seconds
    pub sweep_interval_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PLATFORM_PORT}"),
            zero_trust: false,
            registry_path: Some(PathBuf::from("marketplace.json")),
            audit_log_path: Some(PathBuf::from("audit.log")),
            audit_scan_window: Some(DEFAULT_AUDIT_SCAN_WINDOW),
            io_timeout_secs: 10,
            lease_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl PlatformConfig {
    /// Load from a TOML file, filling missing keys with defaults
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(CoreError::Config("bind_address is empty".to_string()));
        }
        if self.io_timeout_secs == 0 {
            return Err(CoreError::Config("io_timeout_secs must be positive".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(CoreError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Domain peer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DomainConfig {
    /// Human readable domain name
    pub name: String,
    /// Listen address for inbound `consume` requests
    pub bind_address: String,
    /// Address other peers should dial; defaults to the bound address
    pub advertised_address: Option<String>,
    /// Platform gateway address
    pub platform_address: String,
    /// Ask the platform to authenticate consumers instead of the allow-list
    pub zero_trust: bool,
    /// Static consumer allow-list; every consumer is admitted when unset
    pub allow_list: Option<Vec<String>>,
    /// Names of locally owned products to publish at startup
    pub products: Vec<String>,
    /// Seconds between discovery cycles
    pub discovery_interval_secs: u64,
    /// Seconds to wait after a failed exchange before retrying
    pub retry_backoff_secs: u64,
    /// Seconds between lease refreshes (`hello` and re-publish); keep it
    /// below the platform's lease TTL. Zero refreshes on every cycle.
    pub heartbeat_interval_secs: u64,
    /// Per-frame read/write deadline in seconds
    pub io_timeout_secs: u64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "domain".to_string(),
            bind_address: "0.0.0.0:9100".to_string(),
            advertised_address: None,
            platform_address: format!("127.0.0.1:{DEFAULT_PLATFORM_PORT}"),
            zero_trust: false,
            allow_list: None,
            products: Vec::new(),
            discovery_interval_secs: 30,
            retry_backoff_secs: 5,
            heartbeat_interval_secs: 300,
            io_timeout_secs: 10,
        }
    }
}

impl DomainConfig {
    /// Load from a TOML file, filling missing keys with defaults
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the peer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains(char::is_whitespace) {
            return Err(CoreError::Config(format!(
                "domain name '{}' must be a single non-empty word",
                self.name
            )));
        }
        if self.platform_address.trim().is_empty() {
            return Err(CoreError::Config("platform_address is empty".to_string()));
        }
        if self.io_timeout_secs == 0 {
            return Err(CoreError::Config("io_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[cfg(feature = "toml")]
fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
}
