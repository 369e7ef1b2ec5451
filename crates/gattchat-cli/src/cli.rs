//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Your display name
        #[arg(short, long)]
        name: Option<String>,
        /// Connect to this device as soon as a scan finds it
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Scan for nearby devices and list them
    Scan {
        /// How long to scan for
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print an example configuration file
    Config,
}
