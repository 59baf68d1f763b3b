//! Trade coordinator: validate, size, execute, then update the registry

use super::error::exchange_error;
use super::{EngineError, ExecutionResult, ExecutionSummary};
use crate::config::{Config, ConfigError, ExecutionMode};
use crate::decision::{Decision, DecisionValidator, TradeAction};
use crate::execution::{ExchangeGateway, ExchangePosition, Fill};
use crate::risk::{LeverageRange, PortfolioRiskManager};
use crate::stoploss::{Position, PositionSide, StopLossManager, StopTrigger, StopUpdate};
use crate::telemetry::{increment_counter, CounterMetric};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Results kept for the execution summary
const MAX_HISTORY: usize = 100;
/// Order quantity precision
const QUANTITY_DP: u32 = 3;

/// Turns validated decisions into exchange orders and registry updates
pub struct TradeCoordinator {
    exchange: Arc<dyn ExchangeGateway>,
    stop_loss: Arc<StopLossManager>,
    risk: Arc<PortfolioRiskManager>,
    validator: DecisionValidator,
    leverage: LeverageRange,
    symbol_count: usize,
    default_position_pct: Decimal,
    paper: bool,
    history: RwLock<VecDeque<ExecutionResult>>,
}

impl TradeCoordinator {
    pub fn new(
        config: &Config,
        exchange: Arc<dyn ExchangeGateway>,
        stop_loss: Arc<StopLossManager>,
        risk: Arc<PortfolioRiskManager>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            exchange,
            stop_loss,
            risk,
            validator: DecisionValidator::new(),
            leverage: config.leverage_range()?,
            symbol_count: config.trading.symbols.len(),
            default_position_pct: config.trading.default_position_pct,
            paper: config.exchange.mode == ExecutionMode::Paper,
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
        })
    }

    /// Execute an action for one symbol outside the decision-text path
    pub async fn execute(
        &self,
        symbol: &str,
        action: TradeAction,
        reason: &str,
        leverage: u32,
        size_pct: Decimal,
    ) -> ExecutionResult {
        let mut decision = Decision::new(symbol, action).with_reason(reason);
        decision.leverage = leverage;
        decision.position_size_pct = size_pct;
        self.execute_decision(&decision).await
    }

    /// Execute one parsed decision; failures come back as unsuccessful results
    pub async fn execute_decision(&self, decision: &Decision) -> ExecutionResult {
        let result = match self.try_execute(decision).await {
            Ok(result) => {
                increment_counter(CounterMetric::ExecutionSuccess, &decision.symbol);
                result
            }
            Err(e) => {
                increment_counter(CounterMetric::ExecutionFailure, &decision.symbol);
                tracing::warn!(
                    symbol = %decision.symbol,
                    action = %decision.action,
                    error = %e,
                    "Execution skipped"
                );
                ExecutionResult::failed(decision, &e, self.paper)
            }
        };

        let mut history = self.history.write().await;
        if history.len() == MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(result.clone());
        result
    }

    async fn try_execute(&self, decision: &Decision) -> Result<ExecutionResult, EngineError> {
        let symbol = decision.symbol.as_str();
        if !decision.valid {
            // no exchange round trip for a decision that cannot execute
            self.validator.validate(decision, None)?;
        }

        let current = match self.exchange.get_current_position(symbol).await {
            Ok(current) => {
                self.stop_loss.reconcile(symbol, current.as_ref()).await;
                current
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Position query failed, assuming flat");
                None
            }
        };
        self.validator.validate(decision, current.as_ref())?;

        match decision.action {
            TradeAction::Hold => Ok(self.hold(decision).await),
            TradeAction::Buy | TradeAction::Sell => {
                let side = if decision.action == TradeAction::Buy {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                let Some(existing) = current.as_ref().filter(|p| p.side != side) else {
                    return self.open(decision, side, Vec::new()).await;
                };

                let fill = self
                    .close_live(symbol, existing, &format!("reversing to {}", side))
                    .await?;
                let closed = format!("closed {} {} @ {}", existing.side, fill.quantity, fill.price);
                match self.open(decision, side, vec![closed.clone()]).await {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        // the close already happened and must still be reported
                        tracing::warn!(symbol = %symbol, error = %e, "Reversal closed but open failed");
                        Ok(ExecutionResult::filled(
                            decision,
                            &fill,
                            format!("{}; open {} failed: {}", closed, side, e),
                            self.paper,
                        ))
                    }
                }
            }
            TradeAction::CloseLong | TradeAction::CloseShort => {
                let live = current
                    .as_ref()
                    .ok_or_else(|| EngineError::NoPosition(symbol.to_string()))?;
                let reason = if decision.reason.is_empty() {
                    decision.action.as_str()
                } else {
                    decision.reason.as_str()
                };
                let fill = self.close_live(symbol, live, reason).await?;
                Ok(ExecutionResult::filled(
                    decision,
                    &fill,
                    format!("closed {} {} @ {}", live.side, fill.quantity, fill.price),
                    self.paper,
                ))
            }
        }
    }

    async fn open(
        &self,
        decision: &Decision,
        side: PositionSide,
        mut notes: Vec<String>,
    ) -> Result<ExecutionResult, EngineError> {
        let symbol = decision.symbol.as_str();

        let account = self
            .exchange
            .get_account_info()
            .await
            .map_err(exchange_error)?;
        self.risk.update_balance(account).await;
        self.risk.ensure_min_balance().await?;

        let price = self
            .exchange
            .current_price(symbol)
            .await
            .map_err(exchange_error)?;
        if price <= Decimal::ZERO {
            return Err(EngineError::Exchange(format!(
                "invalid price {} for {}",
                price, symbol
            )));
        }

        let leverage = self.leverage.resolve(decision.leverage);
        let size_pct = if decision.position_size_pct > Decimal::ZERO {
            decision.position_size_pct
        } else {
            self.default_position_pct
        };
        let allocation = self.risk.allocation_for(self.symbol_count).await;
        let quantity = (allocation * size_pct / Decimal::ONE_HUNDRED * Decimal::from(leverage)
            / price)
            .round_dp(QUANTITY_DP);
        if quantity <= Decimal::ZERO {
            return Err(EngineError::OrderTooSmall(symbol.to_string()));
        }

        self.risk
            .check_risk_limits(symbol, quantity, price, leverage)
            .await?;

        let fill = self
            .exchange
            .open_position(symbol, side, quantity, leverage)
            .await
            .map_err(exchange_error)?;

        let config = self.stop_loss.config();
        let stop = decision
            .stop_loss
            .filter(|s| *s > Decimal::ZERO)
            .unwrap_or_else(|| side.stop_from(fill.price, config.default_stop_pct));

        let mut position = Position::new(
            format!("{}-{}-{}", symbol, Utc::now().timestamp(), Uuid::new_v4().simple()),
            symbol,
            side,
            fill.price,
            fill.quantity,
            leverage,
            stop,
        )
        .with_reason(decision.reason.clone());
        if self.stop_loss.monitor_enabled() {
            position = position.with_trailing(config.trailing_distance);
        }

        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %fill.quantity,
            price = %fill.price,
            leverage,
            stop = %stop,
            "Position opened"
        );

        match self.stop_loss.register_position(position).await {
            Ok(()) => {
                if let Err(e) = self.stop_loss.place_initial_stop_loss(symbol).await {
                    tracing::warn!(symbol = %symbol, error = %e, "Initial stop not placed, retrying next cycle");
                    notes.push(format!("stop pending: {}", e));
                }
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, error = %e, "Opened on exchange but not tracked");
                notes.push(format!("untracked: {}", e));
            }
        }

        notes.insert(
            0,
            format!("opened {} {} @ {} ({}x, stop {})", side, fill.quantity, fill.price, leverage, stop),
        );
        Ok(ExecutionResult::filled(
            decision,
            &fill,
            notes.join("; "),
            self.paper,
        ))
    }

    /// Close an exchange position and retire it from the registry
    ///
    /// Realized PnL recorded is the exchange's last unrealized PnL; the
    /// fill-derived figure is logged next to it.
    async fn close_live(
        &self,
        symbol: &str,
        live: &ExchangePosition,
        reason: &str,
    ) -> Result<Fill, EngineError> {
        let fill = self
            .exchange
            .close_position(symbol, live.side, live.quantity)
            .await
            .map_err(exchange_error)?;

        let realized = live.unrealized_pnl;
        let fill_pnl = live.side.pnl(live.entry_price, fill.price, fill.quantity);
        tracing::info!(
            symbol = %symbol,
            side = %live.side,
            price = %fill.price,
            realized_pnl = %realized,
            fill_pnl = %fill_pnl,
            "Position closed on exchange"
        );

        self.stop_loss
            .close_position(symbol, fill.price, reason, realized)
            .await;
        Ok(fill)
    }

    async fn hold(&self, decision: &Decision) -> ExecutionResult {
        let symbol = decision.symbol.as_str();
        let Some(stop) = decision.stop_loss else {
            return ExecutionResult::no_trade(decision, "hold".to_string(), self.paper);
        };
        if self.stop_loss.get_position(symbol).await.is_none() {
            return ExecutionResult::no_trade(decision, "hold, no tracked position".to_string(), self.paper);
        }

        let reason = if decision.reason.is_empty() {
            "decision stop update"
        } else {
            decision.reason.as_str()
        };
        let message = match self
            .stop_loss
            .update_stop_loss(symbol, stop, reason, StopTrigger::Decision)
            .await
        {
            Ok(StopUpdate::Applied { old, new }) => format!("hold, stop moved {} -> {}", old, new),
            Ok(StopUpdate::Rejected { current, attempted }) => {
                format!("hold, stop {} kept (rejected {})", current, attempted)
            }
            Ok(StopUpdate::BelowThreshold { current, .. }) => {
                format!("hold, stop {} kept (change below threshold)", current)
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Stop update failed");
                format!("hold, stop update failed: {}", e)
            }
        };
        ExecutionResult::no_trade(decision, message, self.paper)
    }

    /// Counts over recent results
    pub async fn execution_summary(&self) -> ExecutionSummary {
        let history = self.history.read().await;
        ExecutionSummary {
            total: history.len(),
            succeeded: history.iter().filter(|r| r.success).count(),
            failed: history.iter().filter(|r| !r.success).count(),
            traded: history.iter().filter(|r| r.traded()).count(),
            last: history.back().cloned(),
        }
    }

    pub async fn history(&self) -> Vec<ExecutionResult> {
        self.history.read().await.iter().cloned().collect()
    }
}
