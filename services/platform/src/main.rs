//! Datamesh platform: registry, audit log and gateway in one process.

use anyhow::Context;
use clap::Parser;
use datamesh_core::logging::{self, LogFormat};
use datamesh_core::PlatformConfig;
use datamesh_mesh::{spawn_lease_sweep, PlatformGateway, RegistryStore};
use datamesh_trust_mesh::{AuditLog, TrustEvaluator};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct VersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

/// Datamesh platform gateway
#[derive(Parser, Debug)]
#[command(name = "datamesh-platform")]
#[command(about = "Central registry and trust gateway for data mesh domains")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// Require a logged hello before discover and consume
    #[arg(long)]
    zero_trust: bool,

    /// Registry JSON file
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Audit log file
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Print version information as JSON and exit
    #[arg(long)]
    version_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version_json {
        let handshake = VersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    logging::try_init(args.log_format)?;
    let config = load_config(&args)?;

    let registry = Arc::new(match &config.registry_path {
        Some(path) => RegistryStore::open(path)
            .await
            .with_context(|| format!("opening registry {}", path.display()))?,
        None => RegistryStore::in_memory(),
    });
    let audit = Arc::new(match &config.audit_log_path {
        Some(path) => AuditLog::open_with_retention(path, config.audit_scan_window)
            .await
            .with_context(|| format!("opening audit log {}", path.display()))?,
        None => AuditLog::in_memory().with_retention(config.audit_scan_window),
    });

    // every run starts from a clean registry and log
    registry.reset().await?;
    audit.reset().await?;

    let trust = TrustEvaluator::new(Arc::clone(&audit), config.zero_trust, config.audit_scan_window);
    let gateway = Arc::new(PlatformGateway::new(
        Arc::clone(&registry),
        trust,
        config.io_timeout(),
    ));
    let handle = gateway.start(&config.bind_address).await?;
    registry
        .set_platform_address(&handle.local_addr().to_string())
        .await?;

    let sweep = spawn_lease_sweep(
        Arc::clone(&registry),
        config.sweep_interval(),
        config.lease_ttl(),
        handle.shutdown_signal(),
    );
    info!(
        addr = %handle.local_addr(),
        zero_trust = config.zero_trust,
        "Platform started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.stop().await;
    sweep.await?;
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<PlatformConfig> {
    let mut config = match &args.config {
        Some(path) => PlatformConfig::from_file(path)?,
        None => PlatformConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if args.zero_trust {
        config.zero_trust = true;
    }
    if let Some(path) = &args.registry {
        config.registry_path = Some(path.clone());
    }
    if let Some(path) = &args.audit_log {
        config.audit_log_path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}
