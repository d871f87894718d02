//! WolfPool - Dynamic Cache Pool Membership
//!
//! Command-line front end: tracks a pool through the file coordinator,
//! prints its membership, and performs administrative resizes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfpool::address::PoolAddress;
use wolfpool::cluster::{open_with_options, ClusterHandle};
use wolfpool::config::{LoggingConfig, WolfPoolConfig};
use wolfpool::error::Error;
use wolfpool::source::{resize_pool, FileCoordinator};

/// Scheme served by the built-in file coordinator
const FILE_SCHEME: &str = "file";

/// WolfPool - Dynamic cache pool membership
#[derive(Parser)]
#[command(name = "wolfpool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfpool.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the pool and log every membership change
    Watch,

    /// Print the current membership and pool summary as JSON
    Members,

    /// Authorize a new pool size
    Resize {
        /// Desired number of endpoints
        #[arg(short, long)]
        size: usize,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfpool.toml")]
        output: PathBuf,

        /// Pool address (<scheme>!<bootstrap>!<path>)
        #[arg(long, default_value = "file!/var/lib/wolfpool!/cache/pools/default")]
        address: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let logging = WolfPoolConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or_else(|| logging.level.clone());
    init_logging(&level, &logging);

    match cli.command {
        Commands::Watch => run_watch(cli.config).await,
        Commands::Members => run_members(cli.config).await,
        Commands::Resize { size } => run_resize(cli.config, size).await,
        Commands::Init { output, address } => run_init(output, address),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<WolfPoolConfig> {
    WolfPoolConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {:?}", path))
}

/// Build the coordinator for an address
fn coordinator_for(address: &PoolAddress, config: &WolfPoolConfig) -> anyhow::Result<FileCoordinator> {
    if address.scheme != FILE_SCHEME {
        bail!(
            "unsupported scheme '{}' in {} (only '{}' is built in)",
            address.scheme,
            address,
            FILE_SCHEME
        );
    }
    Ok(FileCoordinator::new(&address.bootstrap, config.poll_interval()))
}

/// Open the configured pool and wait for it to become ready
async fn open_ready(config: &WolfPoolConfig) -> anyhow::Result<(PoolAddress, ClusterHandle)> {
    let address = config.address()?;
    let coordinator = Arc::new(coordinator_for(&address, config)?);
    let handle = open_with_options(
        &address.path,
        coordinator.clone(),
        coordinator,
        config.pool_options()?,
    );

    match tokio::time::timeout(config.ready_timeout(), handle.ready()).await {
        Ok(Ok(())) => Ok((address, handle)),
        Ok(Err(e)) => {
            handle.close().await;
            Err(e).with_context(|| format!("pool {} failed to become ready", address))
        }
        Err(_) => {
            handle.close().await;
            bail!("pool {} not ready after {:?}", address, config.ready_timeout())
        }
    }
}

/// Track the pool until interrupted
async fn run_watch(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let (address, handle) = open_ready(&config).await?;

    let (members, mut cursor) = handle.snap().await?;
    tracing::info!("Pool {} has {} members", address, members.len());
    for endpoint in &members {
        tracing::info!("  {} (weight {})", endpoint, endpoint.shard_weight);
    }

    loop {
        tokio::select! {
            event = cursor.next() => match event {
                Ok(event) => tracing::info!("{}", event),
                Err(Error::Closed) => break,
                Err(e) => {
                    handle.close().await;
                    return Err(e.into());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    handle.close().await;
    Ok(())
}

/// Print membership and summary once
async fn run_members(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let (_, handle) = open_ready(&config).await?;

    let (members, _) = handle.snap().await?;
    let summary = handle.summary().await?;
    handle.close().await;

    let output = serde_json::json!({
        "summary": summary,
        "members": members,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Write a new size config for the pool
async fn run_resize(config_path: PathBuf, size: usize) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let address = config.address()?;
    let coordinator = coordinator_for(&address, &config)?;

    let revision = resize_pool(&coordinator, &address.path, size).await?;
    println!("Pool {} resized to {} (revision {})", address, size, revision);
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, address: String) -> anyhow::Result<()> {
    let address: PoolAddress = address.parse()?;

    let config = format!(
        r#"# WolfPool Configuration

[pool]
# <scheme>!<bootstrap>!<path>; the file scheme uses a local directory
address = "{address}"
# Size the pool from its config blob; false mirrors discovery
managed = true
# Published until live data arrives
backup = []
ready_timeout_ms = 30000
queue_capacity = 1024

[coordinator]
poll_interval_ms = 1000
retry_delay_ms = 1000

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config)
        .with_context(|| format!("failed to write {:?}", output))?;
    println!("Created configuration file: {:?}", output);
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let address = config.address()?;
    println!("Configuration is valid");
    println!("  Pool: {}", address);
    println!("  Managed: {}", config.pool.managed);
    match config.backup_pool()? {
        Some(backup) => println!("  Backup endpoints: {}", backup.len()),
        None => println!("  Backup endpoints: none"),
    }
    Ok(())
}
