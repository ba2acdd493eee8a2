//! CLI definitions for flightdeck.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use flightdeck_engine::RunStatus;

/// flightdeck operator CLI.
#[derive(Parser)]
#[command(name = "flightdeck")]
#[command(about = "Inspect durable flights and their configuration")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/flightdeck.toml", global = true, env = "FLIGHTDECK_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show the status of one run
    Status {
        /// Run ID
        run_id: String,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List runs, optionally filtered by status
    List {
        /// Status filter (running, waiting, succeeded, failed, fatal); repeatable
        #[arg(long = "status", value_parser = parse_status)]
        statuses: Vec<RunStatus>,
    },

    /// Load and validate the configuration
    CheckConfig,
}

fn parse_status(value: &str) -> Result<RunStatus, String> {
    value.parse()
}
