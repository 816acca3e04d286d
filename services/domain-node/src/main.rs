//! Datamesh domain node: publishes local products and consumes foreign ones.

use clap::Parser;
use datamesh_core::logging::{self, LogFormat};
use datamesh_core::DomainConfig;
use datamesh_domain::DataProduct;
use datamesh_mesh::DomainPeer;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Datamesh domain node
#[derive(Parser, Debug)]
#[command(name = "datamesh-domain")]
#[command(about = "Data mesh domain that publishes and consumes data products")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Domain name
    #[arg(short, long)]
    name: Option<String>,

    /// Listen address for consume requests
    #[arg(short, long)]
    bind: Option<String>,

    /// Address other domains should dial
    #[arg(long)]
    advertise: Option<String>,

    /// Platform gateway address
    #[arg(short, long)]
    platform: Option<String>,

    /// Let the platform authenticate consumers
    #[arg(long)]
    zero_trust: bool,

    /// Admit only these consumers (repeatable)
    #[arg(long = "allow")]
    allow: Vec<String>,

    /// Publish a sample product with this name (repeatable)
    #[arg(long = "product")]
    products: Vec<String>,

    /// Log output format (pretty or json)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::try_init(args.log_format)?;
    let config = load_config(&args)?;

    let (peer, handle) = DomainPeer::bind(&config).await?;
    for (idx, name) in config.products.iter().enumerate() {
        peer.add_product(sample_product(idx as u64 + 1, name, &config.name))
            .await?;
    }

    // the loop announces and publishes on its first cycle
    let shutdown = handle.shutdown_signal();
    let runner = tokio::spawn(Arc::clone(&peer).run(shutdown));
    info!(domain = %peer.name(), addr = %peer.advertised_address(), "Domain started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.stop().await;
    if let Err(e) = runner.await {
        warn!(error = %e, "Discovery loop ended abnormally");
    }

    for product in peer.received_products().await {
        info!(product = %product.name, owner = %product.domain, "Held product");
    }
    Ok(())
}

fn sample_product(data_id: u64, name: &str, domain: &str) -> DataProduct {
    DataProduct::from_entries(
        data_id,
        name,
        domain,
        [
            ("source", json!(domain)),
            ("records", json!(data_id * 100)),
            ("status", json!("ready")),
        ],
    )
}

fn load_config(args: &Args) -> anyhow::Result<DomainConfig> {
    let mut config = match &args.config {
        Some(path) => DomainConfig::from_file(path)?,
        None => DomainConfig::default(),
    };
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(advertise) = &args.advertise {
        config.advertised_address = Some(advertise.clone());
    }
    if let Some(platform) = &args.platform {
        config.platform_address = platform.clone();
    }
    if args.zero_trust {
        config.zero_trust = true;
    }
    if !args.allow.is_empty() {
        config.allow_list = Some(args.allow.clone());
    }
    if !args.products.is_empty() {
        config.products = args.products.clone();
    }
    config.validate()?;
    Ok(config)
}
