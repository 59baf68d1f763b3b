//! Parse command implementation

use crate::config::Config;
use crate::decision::DecisionParser;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Decision text file
    pub file: PathBuf,

    /// Symbols to look for (defaults to trading.symbols)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl ParseArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let text = tokio::fs::read_to_string(&self.file).await?;
        let symbols = if self.symbols.is_empty() {
            config.trading.symbols.clone()
        } else {
            self.symbols.clone()
        };

        let decisions = DecisionParser::new()?.parse(&text, &symbols);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&decisions)?);
            return Ok(());
        }

        println!(
            "{:<12} {:<12} {:>6} {:>5} {:>6} {:>12}  REASON",
            "SYMBOL", "ACTION", "CONF", "LEV", "SIZE%", "STOP"
        );
        for (symbol, decision) in &decisions {
            let action = if decision.valid {
                decision.action.to_string()
            } else {
                "INVALID".to_string()
            };
            let stop = decision
                .stop_loss
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<12} {:<12} {:>6} {:>5} {:>6} {:>12}  {}",
                symbol,
                action,
                decision.confidence,
                decision.leverage,
                decision.position_size_pct,
                stop,
                decision.reason
            );
        }
        Ok(())
    }
}
