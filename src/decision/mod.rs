//! Decision module
//!
//! Parsing raw decision text into per-symbol trade intents and checking
//! them against the current position

mod parser;
mod patterns;
mod types;
mod validator;

pub use parser::DecisionParser;
pub use types::{Decision, TradeAction};
pub use validator::DecisionValidator;

use crate::stoploss::PositionSide;
use rust_decimal::Decimal;
use thiserror::Error;

/// Decision validation errors
#[derive(Debug, Error, PartialEq)]
pub enum DecisionError {
    /// Parser could not produce a usable decision
    #[error("Invalid decision for {symbol}: {reason}")]
    Invalid { symbol: String, reason: String },
    /// Opening in a direction that is already held
    #[error("Conflict on {symbol}: already {side} {quantity}")]
    Conflict {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
    },
    /// Closing a direction that is not held
    #[error("No {side} position to close on {symbol}")]
    NoPosition { symbol: String, side: PositionSide },
}
