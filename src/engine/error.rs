//! Per-symbol failure taxonomy

use crate::decision::DecisionError;
use crate::risk::RiskError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Everything that can stop one symbol's execution in a cycle
///
/// None of these abort the batch; the coordinator turns each into an
/// unsuccessful [`super::ExecutionResult`].
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// Decision missing or unusable
    #[error("Parse error: {0}")]
    Parse(String),
    /// Already holding the requested direction
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Nothing to close
    #[error("No position: {0}")]
    NoPosition(String),
    /// Opening would breach the portfolio exposure limit
    #[error("Risk limit exceeded: projected {projected} > limit {limit}")]
    RiskLimitExceeded { projected: Decimal, limit: Decimal },
    /// Available balance below the floor
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: Decimal, required: Decimal },
    /// Computed quantity rounds to zero
    #[error("Order size rounds to zero for {0}")]
    OrderTooSmall(String),
    /// Gateway failure, no retry within the cycle
    #[error("Exchange error: {0}")]
    Exchange(String),
    /// Configuration problem surfaced at runtime
    #[error("Configuration error: {0}")]
    Config(String),
    /// Storage write failed; never changes control flow
    #[error("Persistence warning: {0}")]
    Persistence(String),
}

impl From<DecisionError> for EngineError {
    fn from(e: DecisionError) -> Self {
        match e {
            DecisionError::Invalid { .. } => EngineError::Parse(e.to_string()),
            DecisionError::Conflict { .. } => EngineError::Conflict(e.to_string()),
            DecisionError::NoPosition { .. } => EngineError::NoPosition(e.to_string()),
        }
    }
}

impl From<RiskError> for EngineError {
    fn from(e: RiskError) -> Self {
        match e {
            RiskError::RiskLimitExceeded { projected, limit } => {
                EngineError::RiskLimitExceeded { projected, limit }
            }
            RiskError::InsufficientBalance {
                available,
                required,
            } => EngineError::InsufficientBalance {
                available,
                required,
            },
            RiskError::InvalidLeverageRange(reason) => EngineError::Config(reason),
        }
    }
}

pub(super) fn exchange_error(e: anyhow::Error) -> EngineError {
    EngineError::Exchange(e.to_string())
}
