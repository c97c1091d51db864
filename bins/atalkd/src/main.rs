use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use atalk::link::{LtoudpDriver, TashtalkDriver};
use atalk::port::{PortConfig, PortSeed};
use atalk::types::{NetRange, ZoneName};
use atalk::Router;

use crate::config::{Config, PortEntry};

mod config;

#[derive(Parser)]
#[command(name = "atalkd", about = "AppleTalk internet router")]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enables verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::read(cli.config).context("loading configuration")?;

    let filter = if cli.verbose {
        "atalk=debug,atalkd=debug".to_string()
    } else {
        cfg.log_filter.clone().unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).context("building log filter")?)
        .init();

    let mut builder = Router::builder().with_standard_services();
    for entry in &cfg.ports {
        match entry {
            PortEntry::Ltoudp {
                interface,
                network,
                zone,
            } => {
                let driver = LtoudpDriver::open(*interface)
                    .await
                    .context("opening ltoudp port")?;
                builder = builder.port(Box::new(driver), seeded(*network, zone.clone())?);
            }
            PortEntry::Tashtalk {
                device,
                network,
                zone,
            } => {
                let file = tokio::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(device)
                    .await
                    .with_context(|| format!("opening {}", device.display()))?;
                let (reader, writer) = tokio::io::split(file);
                builder = builder.port(
                    Box::new(TashtalkDriver::new(reader, writer)),
                    seeded(*network, zone.clone())?,
                );
            }
        }
    }

    let router = builder.build();
    router.start().await?;
    info!("router running");

    tokio::signal::ctrl_c().await?;
    router.stop().await;
    info!("router stopped");
    Ok(())
}

/// A port config seeded from the config file, when a network was given.
fn seeded(network: Option<u16>, zone: Option<String>) -> anyhow::Result<PortConfig> {
    let Some(network) = network else {
        return Ok(PortConfig::default());
    };
    let zone = zone
        .map(|z| ZoneName::new(z.into_bytes()))
        .transpose()
        .context("invalid zone name")?;
    Ok(PortConfig {
        seed: Some(PortSeed {
            range: NetRange::single(network),
            zones: zone.clone().into_iter().collect(),
            default_zone: zone,
        }),
    })
}
