//! Run command implementation

use crate::config::Config;
use crate::engine::{self, forward_shutdown_signal, FileDecisionSource};
use clap::Args;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Read decisions from this file instead of trading.decision_file
    #[arg(long)]
    pub decision_file: Option<PathBuf>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let decision_file = self
            .decision_file
            .clone()
            .unwrap_or_else(|| config.trading.decision_file.clone());

        tracing::info!(
            mode = ?config.exchange.mode,
            symbols = ?config.trading.symbols,
            leverage = %config.trading.leverage,
            decision_file = %decision_file.display(),
            "Starting trading loop"
        );

        let cycle = engine::build(config.clone()).await?;
        cycle.prepare().await?;

        let (tx, rx) = watch::channel(false);
        tokio::spawn(forward_shutdown_signal(tx));

        let source = FileDecisionSource::new(decision_file);
        cycle.run(&source, self.once, rx).await
    }
}
