//! Decision types

use crate::stoploss::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade intent for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    /// Open long
    Buy,
    /// Open short
    Sell,
    CloseLong,
    CloseShort,
    Hold,
}

impl TradeAction {
    /// Map an action keyword, English or Chinese, to an action
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "buy" | "long" | "open_long" | "做多" | "开多" | "买入" => Some(TradeAction::Buy),
            "sell" | "short" | "open_short" | "做空" | "开空" | "卖出" => Some(TradeAction::Sell),
            "close_long" | "平多" => Some(TradeAction::CloseLong),
            "close_short" | "平空" => Some(TradeAction::CloseShort),
            "hold" | "wait" | "观望" | "持有" => Some(TradeAction::Hold),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::CloseLong => "CLOSE_LONG",
            TradeAction::CloseShort => "CLOSE_SHORT",
            TradeAction::Hold => "HOLD",
        }
    }

    /// Side a BUY/SELL opens
    pub fn opens(self) -> Option<PositionSide> {
        match self {
            TradeAction::Buy => Some(PositionSide::Long),
            TradeAction::Sell => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Side a CLOSE_LONG/CLOSE_SHORT closes
    pub fn closes(self) -> Option<PositionSide> {
        match self {
            TradeAction::CloseLong => Some(PositionSide::Long),
            TradeAction::CloseShort => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One symbol's parsed intent for the current cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: TradeAction,
    /// 0..=1, zero when not stated
    pub confidence: Decimal,
    /// Suggested leverage, zero when not stated
    pub leverage: u32,
    /// Percent of the symbol allocation, zero when not stated
    pub position_size_pct: Decimal,
    pub stop_loss: Option<Decimal>,
    pub reason: String,
    pub valid: bool,
}

impl Decision {
    /// A valid decision with no optional fields set
    pub fn new(symbol: impl Into<String>, action: TradeAction) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            confidence: Decimal::ZERO,
            leverage: 0,
            position_size_pct: Decimal::ZERO,
            stop_loss: None,
            reason: String::new(),
            valid: true,
        }
    }

    /// An invalid decision carrying a diagnostic
    pub fn invalid(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            valid: false,
            ..Self::new(symbol, TradeAction::Hold)
        }
    }

    pub fn with_stop_loss(mut self, stop: Decimal) -> Self {
        self.stop_loss = Some(stop);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}
