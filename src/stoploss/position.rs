//! Tracked position state

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of a leveraged position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Signed PnL of moving from `entry` to `exit` with `quantity`
    pub fn pnl(self, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
        match self {
            PositionSide::Long => (exit - entry) * quantity,
            PositionSide::Short => (entry - exit) * quantity,
        }
    }

    /// Stop price `pct` adverse from `price`
    pub fn stop_from(self, price: Decimal, pct: Decimal) -> Decimal {
        match self {
            PositionSide::Long => price * (Decimal::ONE - pct),
            PositionSide::Short => price * (Decimal::ONE + pct),
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// How the stop is managed after placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopLossType {
    /// Moves only on explicit decisions
    Fixed,
    /// Follows the high-water mark at `trailing_distance`
    Trailing,
}

/// Lifecycle state of a tracked position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    /// Registered, no stop order resting on the exchange
    Open,
    /// Initial stop order placed
    Protected,
    /// Stop moved at least once
    Trailed,
    /// Terminal
    Closed,
}

/// Who asked for a stop move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopTrigger {
    /// A parsed trade decision supplied a new stop
    Decision,
    /// The local trailing monitor
    Program,
}

/// An accepted stop-loss change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossEvent {
    pub id: Uuid,
    pub position_id: String,
    pub timestamp: DateTime<Utc>,
    pub old_stop: Decimal,
    pub new_stop: Decimal,
    pub reason: String,
    pub trigger: StopTrigger,
}

/// One open leveraged position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique while open
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub quantity: Decimal,
    pub leverage: u32,
    pub initial_stop_loss: Decimal,
    pub current_stop_loss: Decimal,
    pub stop_loss_type: StopLossType,
    /// Fraction of the high-water mark used for trailing
    pub trailing_distance: Decimal,
    /// Most favorable price seen: highest for longs, lowest for shorts
    pub highest_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_reason: String,
    /// Volatility measure captured at open
    pub atr: Decimal,
    pub state: PositionState,
    /// Resting stop order on the exchange
    pub stop_order_id: Option<String>,
    pub stop_loss_history: Vec<StopLossEvent>,
}

impl Position {
    /// Create a freshly opened position
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: u32,
        initial_stop_loss: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            entry_price,
            entry_time: Utc::now(),
            quantity,
            leverage,
            initial_stop_loss,
            current_stop_loss: initial_stop_loss,
            stop_loss_type: StopLossType::Fixed,
            trailing_distance: Decimal::ZERO,
            highest_price: entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            open_reason: String::new(),
            atr: Decimal::ZERO,
            state: PositionState::Open,
            stop_order_id: None,
            stop_loss_history: vec![],
        }
    }

    /// Switch to trailing management at `distance`
    pub fn with_trailing(mut self, distance: Decimal) -> Self {
        self.stop_loss_type = StopLossType::Trailing;
        self.trailing_distance = distance;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.open_reason = reason.into();
        self
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = atr;
        self
    }

    /// Whether `candidate` tightens the stop for this direction
    pub fn is_more_favorable(&self, candidate: Decimal) -> bool {
        match self.side {
            PositionSide::Long => candidate > self.current_stop_loss,
            PositionSide::Short => candidate < self.current_stop_loss,
        }
    }

    /// Whether a stop at `stop` would fire immediately at mark `price`
    pub fn stop_would_trigger_at(&self, stop: Decimal, price: Decimal) -> bool {
        match self.side {
            PositionSide::Long => stop >= price,
            PositionSide::Short => stop <= price,
        }
    }

    /// Refresh mark price, high-water mark and unrealized PnL
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        let favorable = match self.side {
            PositionSide::Long => price > self.highest_price,
            PositionSide::Short => price < self.highest_price,
        };
        if favorable {
            self.highest_price = price;
        }
        self.unrealized_pnl = self.side.pnl(self.entry_price, price, self.quantity);
    }

    /// Unrealized PnL in percent of entry, before leverage
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let change = match self.side {
            PositionSide::Long => self.current_price - self.entry_price,
            PositionSide::Short => self.entry_price - self.current_price,
        };
        change / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Whether the current stop has been crossed at `price`
    pub fn should_trigger_stop(&self, price: Decimal) -> bool {
        if self.current_stop_loss.is_zero() {
            return false;
        }
        self.stop_would_trigger_at(self.current_stop_loss, price)
    }

    /// Reward-to-risk ratio for a take-profit at `target`
    pub fn risk_reward(&self, target: Decimal) -> Option<Decimal> {
        let risk = (self.entry_price - self.current_stop_loss).abs();
        if risk.is_zero() {
            return None;
        }
        let reward = match self.side {
            PositionSide::Long => target - self.entry_price,
            PositionSide::Short => self.entry_price - target,
        };
        Some(reward / risk)
    }

    /// Trailing stop candidate from the high-water mark
    pub fn trailing_candidate(&self) -> Option<Decimal> {
        if self.stop_loss_type != StopLossType::Trailing || self.trailing_distance.is_zero() {
            return None;
        }
        Some(self.side.stop_from(self.highest_price, self.trailing_distance))
    }
}
