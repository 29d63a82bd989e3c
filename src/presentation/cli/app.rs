use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// warden — central event-processing server
///
/// Consumes keepalives and check results from the broker, derives events
/// and dispatches them through configurable handler pipelines.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to custom config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the event-processing server
    #[command(alias = "d")]
    Daemon {
        /// Run with shortened intervals and no pause-on-reconnect
        #[arg(long)]
        testing: bool,
    },

    /// Load and check the configuration and registry
    #[command(alias = "v")]
    Validate,
}
