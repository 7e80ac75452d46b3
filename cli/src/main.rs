// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # pv-mounter
//!
//! Mounts a Kubernetes PersistentVolumeClaim on a local directory over SSH (sshfs)
//! or NFS, whatever pods currently hold the claim.
//!
//! ## Commands
//!
//! - `pv-mounter mount <namespace> <pvc> <path>` - Expose the volume and mount it locally
//! - `pv-mounter clean <namespace> <pvc> <path>` - Unmount and remove the exposer
//! - `pv-mounter config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use pv_mounter::commands::{self, CleanArgs, ConfigCommand, MountArgs};
use pv_mounter::signals::INTERRUPTED_EXIT_CODE;
use pv_mounter_core::domain::config::MounterConfig;
use pv_mounter_core::domain::error::MountError;

/// Mount Kubernetes persistent volumes on a local path
#[derive(Parser, Debug)]
#[command(name = "pv-mounter")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PV_MOUNTER_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        global = true,
        env = "PV_MOUNTER_LOG_LEVEL",
        default_value = "info"
    )]
    log_level: String,

    /// Debug logging, and show port-forward and sshfs output
    #[arg(long, global = true, env = "DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount a PVC on a local directory
    #[command(name = "mount")]
    Mount(MountArgs),

    /// Unmount a PVC and remove what `mount` created for it
    #[command(name = "clean")]
    Clean(CleanArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    if let Err(e) = init_logging(level) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{}", error_line(&e));
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Mount(args) => {
            let config = load_config(cli.config)?;
            commands::mount::execute(args, config, cli.debug).await
        }
        Commands::Clean(args) => {
            let config = load_config(cli.config)?;
            commands::clean::execute(args, config, cli.debug).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<MounterConfig> {
    MounterConfig::load_or_default(path).context("Failed to load configuration")
}

fn error_line(error: &anyhow::Error) -> String {
    match error.downcast_ref::<MountError>() {
        Some(mount_error) => format!(
            "{} {}",
            format!("Error [{}]:", mount_error.kind()).red().bold(),
            mount_error
        ),
        None => format!("{} {:#}", "Error:".red().bold(), error),
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<MountError>() {
        Some(MountError::Cancelled) => INTERRUPTED_EXIT_CODE,
        _ => 1,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
