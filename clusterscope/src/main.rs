use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};

use clusterscope_core::config::Config;
use clusterscope_core::observability::init_tracing;
use clusterscope_core::{DiscoveryEngine, DiscoveryResult};

#[derive(Parser)]
#[command(name = "clusterscope")]
#[command(about = "Continuous discovery of virtualization clusters and backup servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run discovery cycles on the configured interval until interrupted
    Run {
        /// Configuration file
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Run a single discovery cycle and print the result as JSON
    Once {
        /// Configuration file
        #[arg(long, short)]
        config: PathBuf,

        /// Write the result to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file and exit
    CheckConfig {
        /// Configuration file
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(&config)?;
            init_tracing(&config.observability.logging)?;
            run(config).await
        }
        Commands::Once { config, output } => {
            let config = load_config(&config)?;
            init_tracing(&config.observability.logging)?;

            let engine = DiscoveryEngine::from_config(&config)?;
            let result = engine.run_cycle().await;
            write_result(&result, output.as_deref())
        }
        Commands::CheckConfig { config: path } => {
            let config = load_config(&path)?;
            println!(
                "{}: ok ({} hypervisor endpoints, {} archive endpoints)",
                path.display(),
                config.endpoints.pve.len(),
                config.endpoints.pbs.len()
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

async fn run(config: Config) -> Result<()> {
    let engine = DiscoveryEngine::from_config(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = engine.caches().spawn_sweeper(config.cache.sweep_interval, shutdown_rx);

    info!(
        interval = ?config.discovery.cycle_interval,
        pve = config.endpoints.pve.len(),
        pbs = config.endpoints.pbs.len(),
        "Starting discovery loop"
    );

    let mut ticker = tokio::time::interval(config.discovery.cycle_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = engine.run_cycle().await;
                info!(
                    cycle = result.cycle_stats.cycle,
                    duration_ms = result.cycle_stats.duration_ms,
                    nodes = result.nodes.len(),
                    guests = result.vms.len() + result.containers.len(),
                    "Cycle finished"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!("Cache sweeper task failed: {}", e);
    }
    Ok(())
}

fn write_result(result: &DiscoveryResult, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize discovery result")?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Discovery result written");
        }
        None => println!("{}", json),
    }
    Ok(())
}
