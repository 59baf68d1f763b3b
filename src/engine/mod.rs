//! Engine module
//!
//! Trade coordination, the per-cycle loop, decision sources and background
//! tasks, plus wiring of the configured gateway and storage.

mod coordinator;
mod cycle;
mod error;
mod source;
mod tasks;
mod types;

pub use coordinator::TradeCoordinator;
pub use cycle::TradingCycle;
pub use error::EngineError;
pub use source::{DecisionSource, FileDecisionSource};
pub use tasks::{forward_shutdown_signal, record_balance, run_balance_snapshots};
pub use types::{CycleReport, ExecutionResult, ExecutionSummary};

use crate::config::{Config, ExecutionMode};
use crate::execution::{BinanceConfig, BinanceFutures, ExchangeGateway, PaperExchange};
use crate::storage::create_storage;
use std::sync::Arc;

/// Create the gateway selected by `exchange.mode`
///
/// Paper mode simulates fills locally but takes marks from the exchange's
/// public ticker.
pub fn create_exchange(config: &Config) -> anyhow::Result<Arc<dyn ExchangeGateway>> {
    match config.exchange.mode {
        ExecutionMode::Paper => {
            let ticker = BinanceFutures::new(BinanceConfig::public(&config.exchange))?;
            tracing::info!(balance = %config.exchange.paper_balance, "Using paper gateway");
            Ok(Arc::new(
                PaperExchange::new(config.exchange.paper_balance, config.exchange.paper_fee_rate)
                    .with_price_feed(Arc::new(ticker)),
            ))
        }
        ExecutionMode::Live => {
            tracing::info!(base_url = %config.exchange.base_url, "Using live Binance gateway");
            Ok(Arc::new(BinanceFutures::new(BinanceConfig::from_exchange(
                &config.exchange,
            )?)?))
        }
    }
}

/// Build a trading cycle from configuration
pub async fn build(config: Config) -> anyhow::Result<TradingCycle> {
    let exchange = create_exchange(&config)?;
    let storage = create_storage(&config.storage).await?;
    TradingCycle::new(config, exchange, storage)
}
