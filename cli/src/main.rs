// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Volumes CLI
//!
//! The `aegis-volumes` binary inspects and maintains the pod volume tree of
//! an Agent Host node, using the same on-disk layout the agent relies on
//! after a restart.
//!
//! ## Commands
//!
//! - `aegis-volumes scan [--json]` - List volumes reconstructed from disk
//! - `aegis-volumes gc [--dry-run]` - Remove leftovers of interrupted tear downs
//! - `aegis-volumes path <pod> <kind> <name>` - Print a volume's canonical path
//! - `aegis-volumes config show|validate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::ConfigCommand;

/// AEGIS Volumes - Inspect and maintain node-local pod volumes
#[derive(Parser)]
#[command(name = "aegis-volumes")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_VOLUME_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Root directory of the pod volume tree (overrides configuration)
    #[arg(long, global = true, value_name = "DIR")]
    root_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List volumes found under the root directory
    #[command(name = "scan")]
    Scan {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove directories left behind by interrupted tear downs
    #[command(name = "gc")]
    Gc {
        /// Only list what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the canonical path of a volume
    #[command(name = "path")]
    Path {
        pod_id: String,
        /// Volume kind (host, empty, gce-pd)
        kind: String,
        name: String,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Scan { json }) => {
            let config = commands::volume::load_config(cli.config, cli.root_dir)?;
            commands::volume::scan(&config, json).await
        }
        Some(Commands::Gc { dry_run }) => {
            let config = commands::volume::load_config(cli.config, cli.root_dir)?;
            commands::volume::gc(&config, dry_run).await
        }
        Some(Commands::Path { pod_id, kind, name }) => {
            let config = commands::volume::load_config(cli.config, cli.root_dir)?;
            commands::volume::path(&config, &pod_id, &kind, &name)
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
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
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
