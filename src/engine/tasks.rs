//! Background tasks and shutdown signalling

use crate::execution::ExchangeGateway;
use crate::risk::PortfolioRiskManager;
use crate::storage::{BalanceSnapshot, Storage};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Fetch balances, refresh exposure gauges and append a snapshot
pub async fn record_balance(
    exchange: &dyn ExchangeGateway,
    risk: &PortfolioRiskManager,
    storage: &dyn Storage,
) -> anyhow::Result<BalanceSnapshot> {
    let account = exchange.get_account_info().await?;
    risk.update_balance(account).await;
    let exposure = risk.exposure_snapshot().await;

    let snapshot = BalanceSnapshot {
        timestamp: Utc::now(),
        total_balance: account.total_balance,
        available_balance: account.available_balance,
        unrealized_pnl: account.unrealized_pnl,
        positions: exposure.per_symbol.len(),
    };
    if let Err(e) = storage.save_balance_history(&snapshot).await {
        tracing::warn!(error = %e, "Failed to save balance snapshot");
    }
    tracing::debug!(
        total = %snapshot.total_balance,
        available = %snapshot.available_balance,
        exposure = %exposure.total_exposure,
        "Balance recorded"
    );
    Ok(snapshot)
}

/// Record a balance snapshot every `interval` until shutdown
pub async fn run_balance_snapshots(
    exchange: Arc<dyn ExchangeGateway>,
    risk: Arc<PortfolioRiskManager>,
    storage: Arc<dyn Storage>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    tracing::info!(interval_secs = interval.as_secs(), "Balance snapshot task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = record_balance(exchange.as_ref(), &risk, storage.as_ref()).await {
                    tracing::warn!(error = %e, "Balance snapshot failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Balance snapshot task stopped");
}

/// Flip `tx` on Ctrl-C or SIGTERM
pub async fn forward_shutdown_signal(tx: watch::Sender<bool>) {
    wait_for_signal().await;
    tracing::info!("Shutdown signal received");
    let _ = tx.send(true);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
