// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use pv_mounter_core::domain::config::{MounterConfig, CONFIG_ENV_VAR};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write the built-in defaults as a starting configuration
    Generate {
        #[arg(short, long, default_value = "./pv-mounter.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        for (i, path) in MounterConfig::search_paths().iter().enumerate() {
            let marker = if path.exists() { "found" } else { "missing" };
            println!("  {}. {} ({})", i + 1, path.display(), marker.dimmed());
        }
        println!(
            "  {}: {}",
            CONFIG_ENV_VAR,
            std::env::var(CONFIG_ENV_VAR)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!();
    }

    let config =
        MounterConfig::load_or_default(config_override).context("Failed to load configuration")?;

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Tools:".bold());
    println!("  kubectl: {}", config.spec.tools.kubectl);
    println!();

    println!("{}", "Images:".bold());
    println!("  SSH: {}", config.spec.images.ssh);
    println!("  SSH (root): {}", config.spec.images.ssh_privileged);
    println!("  NFS: {}", config.spec.images.nfs);
    println!("  NFS (root): {}", config.spec.images.nfs_privileged);
    println!();

    let resources = &config.spec.resources;
    println!("{}", "Exposer resources:".bold());
    println!(
        "  Requests: cpu={} memory={} ephemeral-storage={}",
        resources.cpu_request, resources.memory_request, resources.ephemeral_storage_request
    );
    println!(
        "  Limits:   cpu={} memory={} ephemeral-storage={}",
        resources.cpu_limit, resources.memory_limit, resources.ephemeral_storage_limit
    );
    println!();

    let timing = &config.spec.timing;
    println!("{}", "Timing:".bold());
    println!("  Poll interval: {:?}", timing.poll_interval());
    println!("  Pod ready timeout: {:?}", timing.ready_timeout());
    println!("  Transport timeout: {:?}", timing.transport_timeout());
    println!("  NFS mount attempts: {}", timing.nfs_mount_attempts);
    println!("  Shutdown grace: {:?}", timing.shutdown_grace());
    println!();

    println!("{}", "Local ports:".bold());
    let range = config.spec.ports.range();
    println!("  {}-{}", range.start(), range.end());

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    // load_or_default validates before returning
    MounterConfig::load_or_default(config_path).context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    MounterConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}
