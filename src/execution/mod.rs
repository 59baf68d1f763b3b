//! Exchange gateway module
//!
//! Order placement, stop orders and account queries (paper and live modes)

mod binance;
mod paper;
mod types;

pub use binance::{BinanceConfig, BinanceFutures};
pub use paper::PaperExchange;
pub use types::{
    exchange_symbol, AccountInfo, ExchangePosition, Fill, MarginType, OrderId, OrderSide,
    StopOrder,
};

use crate::stoploss::PositionSide;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Gateway failures callers branch on
///
/// Travels inside `anyhow::Error`; recover it with `downcast_ref`.
#[derive(Debug, Error, PartialEq)]
pub enum GatewayError {
    /// Order is no longer resting: filled, cancelled or never placed
    #[error("Unknown order {order_id} on {symbol}")]
    UnknownOrder { symbol: String, order_id: String },
    /// Exchange rejected the request
    #[error("Exchange API error {code}: {msg}")]
    Api { code: i64, msg: String },
}

impl GatewayError {
    /// Whether `error` says the order is already gone
    pub fn is_unknown_order(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<GatewayError>(),
            Some(GatewayError::UnknownOrder { .. })
        )
    }
}

/// Trait for exchange gateway implementations
///
/// Symbols are passed in configured `BASE/QUOTE` form. Implementations own
/// their request timeouts; every call returns within a bounded time.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Account balances
    async fn get_account_info(&self) -> anyhow::Result<AccountInfo>;
    /// Current position for a symbol, if any
    async fn get_current_position(&self, symbol: &str) -> anyhow::Result<Option<ExchangePosition>>;
    /// Latest traded price
    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
    /// Open (or add to) a position with a market order
    async fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        leverage: u32,
    ) -> anyhow::Result<Fill>;
    /// Reduce a position with a market order
    async fn close_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
    ) -> anyhow::Result<Fill>;
    /// Place a reduce-only stop-market order protecting a position
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> anyhow::Result<OrderId>;
    /// Cancel a resting order
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()>;
    /// Margin mode of a symbol
    async fn detect_margin_type(&self, symbol: &str) -> anyhow::Result<MarginType>;
}

/// Source of live mark prices for the paper gateway
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}
