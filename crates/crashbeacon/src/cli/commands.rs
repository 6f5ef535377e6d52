//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Do not seed a placeholder record on startup
    #[arg(long)]
    pub no_bootstrap: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Push command arguments.
///
/// Coordinates are taken as text because that is how reporting devices send
/// them.
#[derive(Debug, Args)]
pub struct PushCommand {
    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: String,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub long: String,

    /// Observation time in milliseconds since the Unix epoch (defaults to now)
    #[arg(short, long)]
    pub timestamp: Option<i64>,

    /// Write the record even if it does not validate
    #[arg(long)]
    pub allow_invalid: bool,
}

/// Demo command arguments.
#[derive(Debug, Args)]
pub struct DemoCommand {
    /// Delay between scripted updates in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
