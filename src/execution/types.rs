//! Execution types

use crate::stoploss::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned order identifier
pub type OrderId = String;

/// Order direction on the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens a position in `side`
    pub fn opening(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Side that reduces a position in `side`
    pub fn closing(side: PositionSide) -> Self {
        Self::opening(side.opposite())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Margin mode of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    Cross,
}

impl fmt::Display for MarginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginType::Isolated => write!(f, "isolated"),
            MarginType::Cross => write!(f, "cross"),
        }
    }
}

/// A fill (executed market order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    /// Average fill price
    pub price: Decimal,
    pub quantity: Decimal,
    pub fees: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Account balances in the quote asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

/// The exchange's view of a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
}

/// A resting reduce-only stop-market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrder {
    pub order_id: OrderId,
    pub symbol: String,
    /// Side of the position the stop protects
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub stop_price: Decimal,
}

/// Exchange symbol for a configured symbol: `BTC/USDT` becomes `BTCUSDT`
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth/usdt"), "ETHUSDT");
        assert_eq!(exchange_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(OrderSide::opening(PositionSide::Long), OrderSide::Buy);
        assert_eq!(OrderSide::closing(PositionSide::Long), OrderSide::Sell);
        assert_eq!(OrderSide::opening(PositionSide::Short), OrderSide::Sell);
        assert_eq!(OrderSide::closing(PositionSide::Short), OrderSide::Buy);
        assert_eq!(OrderSide::Buy.as_str(), "BUY");
    }

    #[test]
    fn test_margin_type_display() {
        assert_eq!(MarginType::Isolated.to_string(), "isolated");
        assert_eq!(MarginType::Cross.to_string(), "cross");
    }
}
