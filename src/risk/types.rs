//! Risk management types

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Risk management errors
#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    /// Aggregate notional would exceed balance × max risk × leverage
    #[error("Risk limit exceeded: projected exposure {projected} > limit {limit}")]
    RiskLimitExceeded { projected: Decimal, limit: Decimal },
    /// Available balance below the configured floor
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: Decimal, required: Decimal },
    /// Leverage bounds unusable
    #[error("Invalid leverage range: {0}")]
    InvalidLeverageRange(String),
}

/// Balance and notional exposure, computed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureSnapshot {
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    /// Quantity × entry price per symbol
    pub per_symbol: BTreeMap<String, Decimal>,
    pub total_exposure: Decimal,
    pub unrealized_pnl: Decimal,
}

impl ExposureSnapshot {
    /// Share of aggregate exposure held in `symbol`
    pub fn share(&self, symbol: &str) -> Decimal {
        if self.total_exposure.is_zero() {
            return Decimal::ZERO;
        }
        self.per_symbol
            .get(symbol)
            .map_or(Decimal::ZERO, |e| e / self.total_exposure)
    }
}

/// Informational over-concentration hint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationWarning {
    pub symbol: String,
    pub exposure: Decimal,
    /// Fraction of aggregate exposure
    pub share: Decimal,
}
