//! Decision validation against the current exchange position

use super::{Decision, DecisionError, TradeAction};
use crate::execution::ExchangePosition;

/// Checks a decision for internal and positional consistency
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionValidator;

impl DecisionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a parsed decision before execution
    pub fn validate(
        &self,
        decision: &Decision,
        current: Option<&ExchangePosition>,
    ) -> Result<(), DecisionError> {
        if !decision.valid {
            return Err(DecisionError::Invalid {
                symbol: decision.symbol.clone(),
                reason: decision.reason.clone(),
            });
        }
        self.check_action(&decision.symbol, decision.action, current)
    }

    /// Positional rules only: no double-open, no close without a matching position
    pub fn check_action(
        &self,
        symbol: &str,
        action: TradeAction,
        current: Option<&ExchangePosition>,
    ) -> Result<(), DecisionError> {
        if let Some(side) = action.opens() {
            if let Some(position) = current.filter(|p| p.side == side) {
                return Err(DecisionError::Conflict {
                    symbol: symbol.to_string(),
                    side,
                    quantity: position.quantity,
                });
            }
        }

        if let Some(side) = action.closes() {
            if !current.is_some_and(|p| p.side == side) {
                return Err(DecisionError::NoPosition {
                    symbol: symbol.to_string(),
                    side,
                });
            }
        }

        Ok(())
    }
}
