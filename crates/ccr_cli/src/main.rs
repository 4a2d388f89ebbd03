//! CCR CLI - Monte-Carlo counterparty exposure runs
//!
//! # Commands
//!
//! - `ccr run` - Simulate exposures and print the profile per netting set
//! - `ccr check` - Validate the configuration and show the resolved setup

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use config::RunConfig;

/// Monte-Carlo counterparty exposure calculator
#[derive(Parser, Debug)]
#[command(name = "ccr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML format)
    #[arg(short, long, global = true, default_value = "ccr.toml", value_name = "FILE")]
    config: PathBuf,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CCR_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate exposures and print the profile per netting set
    Run {
        /// Number of Monte-Carlo paths
        #[arg(short, long)]
        paths: Option<usize>,

        /// Worker allocation: automatic, disabled or a positive count
        #[arg(short, long)]
        workers: Option<ccr_parallel::WorkerAllocation>,

        /// Root random seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Ignore own default
        #[arg(long)]
        unilateral: bool,
    },

    /// Validate the configuration and show the resolved setup
    Check,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RunConfig::from_file(&cli.config)
        .and_then(RunConfig::with_env_override)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_tracing(&config.log_level);
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Run {
            paths,
            workers,
            seed,
            unilateral,
        } => {
            if let Some(paths) = paths {
                config.simulation.paths = paths;
            }
            if let Some(workers) = workers {
                config.parallel.workers = workers;
            }
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            config.simulation.unilateral |= unilateral;
            commands::run::run(&config)
        }
        Commands::Check => commands::check::run(&config),
    }
}
