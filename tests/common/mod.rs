//! Shared fixtures for integration tests

#![allow(dead_code)]

use perp_guard::config::Config;
use perp_guard::engine::TradingCycle;
use perp_guard::execution::PaperExchange;
use perp_guard::storage::{MemoryStorage, Storage};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub fn create_test_config(symbols: &[&str], leverage: &str) -> Config {
    let mut config: Config = toml::from_str(
        r#"
        [exchange]
        mode = "paper"
        paper_fee_rate = 0

        [trading]
        symbols = ["BTC/USDT"]
    "#,
    )
    .unwrap();
    config.trading.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.trading.leverage = leverage.to_string();
    config
}

pub async fn create_test_exchange(balance: Decimal) -> Arc<PaperExchange> {
    let exchange = Arc::new(PaperExchange::new(balance, dec!(0)));
    exchange.set_mark_price("BTC/USDT", dec!(100)).await;
    exchange
}

pub struct TestHarness {
    pub cycle: TradingCycle,
    pub exchange: Arc<PaperExchange>,
    pub storage: Arc<MemoryStorage>,
}

pub async fn create_test_harness(config: Config) -> TestHarness {
    let exchange = create_test_exchange(dec!(10000)).await;
    let storage = Arc::new(MemoryStorage::new());
    let cycle = TradingCycle::new(
        config,
        exchange.clone(),
        storage.clone() as Arc<dyn Storage>,
    )
    .unwrap();
    cycle.prepare().await.unwrap();
    TestHarness {
        cycle,
        exchange,
        storage,
    }
}
