//! CLI interface for perp-guard
//!
//! Provides subcommands for:
//! - `run`: Start the trading loop
//! - `parse`: Parse a decision text and print the per-symbol decisions
//! - `status`: Show tracked positions and the last balance snapshot
//! - `config`: Show the effective configuration

mod parse;
mod run;
mod status;

pub use parse::ParseArgs;
pub use run::RunArgs;
pub use status::show_status;

use crate::config::Config;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "perp-guard")]
#[command(about = "Position and risk lifecycle engine for leveraged futures trading")]
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
    /// Start the trading loop
    Run(RunArgs),
    /// Parse a decision file without trading
    Parse(ParseArgs),
    /// Show tracked positions and balance
    Status,
    /// Show configuration
    Config,
}

/// Effective configuration as TOML, secrets masked
pub fn render_config(config: &Config) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.exchange.secret_key.is_some() {
        shown.exchange.secret_key = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}
