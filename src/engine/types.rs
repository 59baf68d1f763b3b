//! Execution result types

use super::EngineError;
use crate::decision::{Decision, TradeAction};
use crate::execution::Fill;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of one symbol's execution; callers branch on `success`
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub action: TradeAction,
    pub symbol: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub message: String,
    pub paper: bool,
}

impl ExecutionResult {
    pub(super) fn filled(decision: &Decision, fill: &Fill, message: String, paper: bool) -> Self {
        Self {
            success: true,
            action: decision.action,
            symbol: decision.symbol.clone(),
            amount: fill.quantity,
            price: fill.price,
            order_id: Some(fill.order_id.clone()),
            timestamp: fill.timestamp,
            reason: decision.reason.clone(),
            message,
            paper,
        }
    }

    pub(super) fn no_trade(decision: &Decision, message: String, paper: bool) -> Self {
        Self {
            success: true,
            action: decision.action,
            symbol: decision.symbol.clone(),
            amount: Decimal::ZERO,
            price: Decimal::ZERO,
            order_id: None,
            timestamp: Utc::now(),
            reason: decision.reason.clone(),
            message,
            paper,
        }
    }

    pub(super) fn failed(decision: &Decision, error: &EngineError, paper: bool) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            ..Self::no_trade(decision, String::new(), paper)
        }
    }

    /// Whether an order actually reached the exchange
    pub fn traded(&self) -> bool {
        self.success && self.order_id.is_some()
    }
}

/// Counts over the coordinator's recent results
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub traded: usize,
    pub last: Option<ExecutionResult>,
}

/// Per-symbol results of one trading cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub results: BTreeMap<String, ExecutionResult>,
    /// Positions whose stop placement was retried successfully at cycle start
    pub reprotected: usize,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| !r.success).count()
    }
}
