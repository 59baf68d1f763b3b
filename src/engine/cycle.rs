//! The trading cycle: decision text in, per-symbol results out

use super::tasks::{record_balance, run_balance_snapshots};
use super::{CycleReport, DecisionSource, TradeCoordinator};
use crate::config::Config;
use crate::decision::DecisionParser;
use crate::execution::{ExchangeGateway, MarginType};
use crate::risk::PortfolioRiskManager;
use crate::stoploss::{PositionMonitor, StopLossManager};
use crate::storage::{Storage, TradingSession};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// All components wired for one process
pub struct TradingCycle {
    config: Config,
    parser: DecisionParser,
    exchange: Arc<dyn ExchangeGateway>,
    storage: Arc<dyn Storage>,
    stop_loss: Arc<StopLossManager>,
    risk: Arc<PortfolioRiskManager>,
    coordinator: Arc<TradeCoordinator>,
}

impl TradingCycle {
    pub fn new(
        config: Config,
        exchange: Arc<dyn ExchangeGateway>,
        storage: Arc<dyn Storage>,
    ) -> anyhow::Result<Self> {
        let stop_loss = Arc::new(StopLossManager::new(
            exchange.clone(),
            storage.clone(),
            config.stoploss.clone(),
        ));
        let risk = Arc::new(PortfolioRiskManager::new(&config.risk, stop_loss.clone()));
        let coordinator = Arc::new(TradeCoordinator::new(
            &config,
            exchange.clone(),
            stop_loss.clone(),
            risk.clone(),
        )?);

        Ok(Self {
            parser: DecisionParser::new()?,
            config,
            exchange,
            storage,
            stop_loss,
            risk,
            coordinator,
        })
    }

    pub fn stop_loss(&self) -> &Arc<StopLossManager> {
        &self.stop_loss
    }

    pub fn risk(&self) -> &Arc<PortfolioRiskManager> {
        &self.risk
    }

    pub fn coordinator(&self) -> &Arc<TradeCoordinator> {
        &self.coordinator
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Restore tracked positions and check the account before the first cycle
    pub async fn prepare(&self) -> anyhow::Result<usize> {
        let restored = self.stop_loss.rehydrate().await?;
        if restored > 0 {
            tracing::info!(restored, "Positions restored from storage");
        }

        let leverage = self.config.leverage_range()?;
        if leverage.is_dynamic() {
            for symbol in &self.config.trading.symbols {
                match self.exchange.detect_margin_type(symbol).await {
                    Ok(MarginType::Isolated) => tracing::warn!(
                        symbol = %symbol,
                        min = leverage.min(),
                        max = leverage.max(),
                        "Dynamic leverage with isolated margin: leverage cannot be lowered while a position is open"
                    ),
                    Ok(MarginType::Cross) => {}
                    Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Margin type check failed"),
                }
            }
        }

        if let Err(e) =
            record_balance(self.exchange.as_ref(), &self.risk, self.storage.as_ref()).await
        {
            tracing::warn!(error = %e, "Initial balance query failed");
        }
        Ok(restored)
    }

    /// Parse one decision text and execute every configured symbol
    ///
    /// One symbol's failure never stops the others.
    pub async fn run_once(&self, text: &str) -> CycleReport {
        let mut report = CycleReport {
            reprotected: self.stop_loss.retry_unprotected().await,
            ..CycleReport::default()
        };

        let decisions = self.parser.parse(text, &self.config.trading.symbols);
        for (symbol, decision) in decisions {
            let result = self.coordinator.execute_decision(&decision).await;
            tracing::info!(
                symbol = %symbol,
                action = %decision.action,
                success = result.success,
                message = %result.message,
                "Symbol processed"
            );

            let session = TradingSession {
                symbol: symbol.clone(),
                created_at: Utc::now(),
                decision,
                executed: result.traded(),
                result: result.message.clone(),
            };
            if let Err(e) = self.storage.save_trading_session(&session).await {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to save trading session");
            }
            report.results.insert(symbol, result);
        }

        if let Err(e) =
            record_balance(self.exchange.as_ref(), &self.risk, self.storage.as_ref()).await
        {
            tracing::warn!(error = %e, "Post-cycle balance snapshot failed");
        }
        self.risk.rebalance_suggestions().await;

        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            positions = self.stop_loss.len().await,
            "Trading cycle complete"
        );
        report
    }

    /// One interval of the loop
    ///
    /// New decision text runs a full cycle. Without it, positions left
    /// unprotected still get their stop placement retried.
    pub async fn tick(&self, source: &dyn DecisionSource) -> Option<CycleReport> {
        match source.next_decision().await {
            Ok(Some(text)) => return Some(self.run_once(&text).await),
            Ok(None) => tracing::debug!("No new decision this cycle"),
            Err(e) => tracing::warn!(error = %e, "Decision source failed"),
        }
        let reprotected = self.stop_loss.retry_unprotected().await;
        if reprotected > 0 {
            tracing::info!(reprotected, "Stops placed for unprotected positions");
        }
        None
    }

    /// Cycle on a fixed interval until the shutdown signal flips
    ///
    /// Background tasks receive the same signal; a cycle already in progress
    /// runs to completion.
    pub async fn run(
        &self,
        source: &dyn DecisionSource,
        once: bool,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut tasks = Vec::new();
        if !once {
            tasks.push(tokio::spawn(run_balance_snapshots(
                self.exchange.clone(),
                self.risk.clone(),
                self.storage.clone(),
                Duration::from_secs(self.config.storage.snapshot_interval_secs.max(1)),
                shutdown.clone(),
            )));
            if self.stop_loss.monitor_enabled() {
                let monitor = PositionMonitor::new(
                    self.stop_loss.clone(),
                    self.exchange.clone(),
                    Duration::from_secs(self.config.stoploss.monitor_interval_secs.max(1)),
                );
                tasks.push(tokio::spawn(monitor.run(shutdown.clone())));
            }
        }

        let mut shutdown = shutdown;
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.trading.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(source).await;
                    if once {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Trading loop stopped");
        Ok(())
    }
}
