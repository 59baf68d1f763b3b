//! Stop-loss module
//!
//! The position registry and its stop-loss state machine:
//! OPEN → PROTECTED → TRAILED → CLOSED. The registry is the only owner of
//! live positions; everything else reads snapshots through it.

mod manager;
mod monitor;
mod position;

pub use manager::{ClosedPosition, StopLossManager, StopUpdate};
pub use monitor::PositionMonitor;
pub use position::{
    Position, PositionSide, PositionState, StopLossEvent, StopLossType, StopTrigger,
};

use rust_decimal::Decimal;
use thiserror::Error;

/// Stop-loss manager errors
#[derive(Debug, Error, PartialEq)]
pub enum StopLossError {
    /// Symbol already has an active position
    #[error("Position already registered for {0}")]
    AlreadyRegistered(String),
    /// Position id reused while the original is still open
    #[error("Position id {0} already in use")]
    DuplicateId(String),
    /// No active position for the symbol
    #[error("No active position for {0}")]
    NotFound(String),
    /// Stop is already through the mark price
    #[error("Stop {stop} would trigger immediately for {side} at mark {mark}")]
    WouldTriggerImmediately {
        side: PositionSide,
        stop: Decimal,
        mark: Decimal,
    },
    /// Stop price is zero or negative
    #[error("Invalid stop price {0}")]
    InvalidStop(Decimal),
    /// Gateway call failed
    #[error("Exchange error: {0}")]
    Exchange(String),
}
