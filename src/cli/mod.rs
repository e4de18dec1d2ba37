//! CLI interface for hl-signalbot
//!
//! Provides subcommands for:
//! - `run`: Start the signal engine
//! - `close`: Manually close the open position
//! - `status`: Show persisted engine state
//! - `config`: Show the resolved configuration

pub mod close;
pub mod run;
pub mod status;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hl-signalbot")]
#[command(about = "Signal-driven BTC perp bot with a native stop/take-profit ladder")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the signal engine
    Run(RunArgs),
    /// Cancel protective orders, market-close the position, reset state
    Close,
    /// Show persisted engine state
    Status,
    /// Show the resolved configuration
    Config,
}
