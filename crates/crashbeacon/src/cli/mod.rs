//! Command-line interface for crashbeacon.
//!
//! This module provides the CLI structure for the `crashbeacon` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{ConfigCommand, DemoCommand, PushCommand, StatusCommand, WatchCommand};

/// crashbeacon - Live tracking of a reported accident location
///
/// Watches a single location record, validates the updates written to it by
/// reporting devices, and raises an emergency alert for every new report.
#[derive(Debug, Parser)]
#[command(name = "crashbeacon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for info, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow the location record until interrupted
    Watch(WatchCommand),

    /// Show the current location record
    Status(StatusCommand),

    /// Write a location record, as a reporting device would
    Push(PushCommand),

    /// Delete the location record
    Clear,

    /// Print a maps link for the current location
    Map,

    /// Run a scripted session against an in-memory feed
    Demo(DemoCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
