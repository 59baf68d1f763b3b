//! Portfolio-wide exposure accounting

use super::{ConcentrationWarning, ExposureSnapshot, RiskError};
use crate::config::RiskConfig;
use crate::execution::AccountInfo;
use crate::stoploss::StopLossManager;
use crate::telemetry::{set_gauge, GaugeMetric};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Aggregates balance and exposure across symbols
///
/// Positions are read through the stop-loss registry; the manager only
/// keeps the latest balance.
pub struct PortfolioRiskManager {
    config: RiskConfig,
    positions: Arc<StopLossManager>,
    balance: RwLock<AccountInfo>,
}

impl PortfolioRiskManager {
    pub fn new(config: &RiskConfig, positions: Arc<StopLossManager>) -> Self {
        Self {
            config: config.clone(),
            positions,
            balance: RwLock::new(AccountInfo {
                total_balance: Decimal::ZERO,
                available_balance: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
            }),
        }
    }

    /// Record the latest account balances
    pub async fn update_balance(&self, info: AccountInfo) {
        *self.balance.write().await = info;
        set_gauge(GaugeMetric::TotalBalance, to_f64(info.total_balance));
        set_gauge(GaugeMetric::AvailableBalance, to_f64(info.available_balance));
    }

    pub async fn balance(&self) -> AccountInfo {
        *self.balance.read().await
    }

    pub async fn exposure_snapshot(&self) -> ExposureSnapshot {
        let balance = self.balance().await;
        let mut per_symbol = BTreeMap::new();
        let mut unrealized_pnl = Decimal::ZERO;
        for position in self.positions.positions().await {
            *per_symbol.entry(position.symbol.clone()).or_insert(Decimal::ZERO) +=
                position.quantity * position.entry_price;
            unrealized_pnl += position.unrealized_pnl;
        }
        let total_exposure = per_symbol.values().copied().sum();

        set_gauge(GaugeMetric::TotalExposure, to_f64(total_exposure));
        set_gauge(GaugeMetric::UnrealizedPnl, to_f64(unrealized_pnl));

        ExposureSnapshot {
            total_balance: balance.total_balance,
            available_balance: balance.available_balance,
            per_symbol,
            total_exposure,
            unrealized_pnl,
        }
    }

    /// Reject a new opening whose notional would push aggregate exposure past the limit
    ///
    /// The limit scales with the leverage the opening actually uses.
    pub async fn check_risk_limits(
        &self,
        symbol: &str,
        size: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<(), RiskError> {
        let snapshot = self.exposure_snapshot().await;
        let projected = snapshot.total_exposure + size * price;
        let limit = snapshot.total_balance * self.config.max_total_risk * Decimal::from(leverage);

        if projected > limit {
            tracing::warn!(
                symbol = %symbol,
                projected = %projected,
                limit = %limit,
                "Risk limit exceeded"
            );
            return Err(RiskError::RiskLimitExceeded { projected, limit });
        }

        tracing::debug!(symbol = %symbol, projected = %projected, limit = %limit, "Risk check passed");
        Ok(())
    }

    /// Openings need at least the configured minimum available balance
    pub async fn ensure_min_balance(&self) -> Result<(), RiskError> {
        let available = self.balance().await.available_balance;
        if available < self.config.min_balance {
            return Err(RiskError::InsufficientBalance {
                available,
                required: self.config.min_balance,
            });
        }
        Ok(())
    }

    /// Balance allotted to one symbol: available × (1/n) × max total risk
    pub async fn allocation_for(&self, symbol_count: usize) -> Decimal {
        if symbol_count == 0 {
            return Decimal::ZERO;
        }
        let available = self.balance().await.available_balance;
        available / Decimal::from(symbol_count) * self.config.max_total_risk
    }

    /// Symbols holding more than the concentration threshold of aggregate exposure
    pub async fn rebalance_suggestions(&self) -> Vec<ConcentrationWarning> {
        let snapshot = self.exposure_snapshot().await;
        let warnings: Vec<ConcentrationWarning> = snapshot
            .per_symbol
            .iter()
            .filter_map(|(symbol, exposure)| {
                let share = snapshot.share(symbol);
                (share > self.config.concentration_threshold).then(|| ConcentrationWarning {
                    symbol: symbol.clone(),
                    exposure: *exposure,
                    share,
                })
            })
            .collect();

        for warning in &warnings {
            tracing::info!(
                symbol = %warning.symbol,
                share = %warning.share.round_dp(4),
                "Exposure concentrated in one symbol"
            );
        }
        warnings
    }

    pub async fn total_unrealized_pnl(&self) -> Decimal {
        self.positions
            .positions()
            .await
            .iter()
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    pub async fn position_count(&self) -> usize {
        self.positions.len().await
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
