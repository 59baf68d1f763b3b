//! Optional local polling monitor
//!
//! Exchange-side resting stops are the primary protection. The monitor is a
//! best-effort supplement: it refreshes marks, trails stops for trailing-type
//! positions and notices positions whose stop already fired.

use super::{StopLossManager, StopTrigger, StopUpdate};
use crate::execution::ExchangeGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodic mark refresh and trailing-stop driver
pub struct PositionMonitor {
    manager: Arc<StopLossManager>,
    exchange: Arc<dyn ExchangeGateway>,
    interval: Duration,
}

impl PositionMonitor {
    pub fn new(
        manager: Arc<StopLossManager>,
        exchange: Arc<dyn ExchangeGateway>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            exchange,
            interval,
        }
    }

    /// One pass over every tracked position; returns the number of stops moved
    pub async fn monitor_once(&self) -> usize {
        let mut moved = 0;
        for position in self.manager.positions().await {
            let symbol = position.symbol.as_str();

            match self.exchange.get_current_position(symbol).await {
                Ok(live) => {
                    if self.manager.reconcile(symbol, live.as_ref()).await.is_some() {
                        continue;
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Position query failed");
                }
            }

            let price = match self.exchange.current_price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Price query failed");
                    continue;
                }
            };
            let Some(refreshed) = self.manager.refresh_price(symbol, price).await else {
                continue;
            };

            if refreshed.should_trigger_stop(price) {
                tracing::warn!(
                    symbol = %symbol,
                    price = %price,
                    stop = %refreshed.current_stop_loss,
                    "Mark through stop, waiting for exchange stop to fill"
                );
                continue;
            }

            let Some(candidate) = refreshed.trailing_candidate() else {
                continue;
            };
            if !refreshed.is_more_favorable(candidate) {
                continue;
            }
            match self
                .manager
                .update_stop_loss(symbol, candidate, "trailing stop", StopTrigger::Program)
                .await
            {
                Ok(StopUpdate::Applied { .. }) => moved += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Trailing update failed"),
            }
        }
        moved
    }

    /// Poll until the shutdown signal flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "Position monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let moved = self.monitor_once().await;
                    if moved > 0 {
                        tracing::debug!(moved, "Trailing stops moved");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Position monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopLossConfig;
    use crate::execution::PaperExchange;
    use crate::stoploss::{Position, PositionSide};
    use crate::storage::MemoryStorage;
    use rust_decimal_macros::dec;

    async fn create_test_monitor() -> (PositionMonitor, Arc<StopLossManager>, Arc<PaperExchange>) {
        let exchange = Arc::new(PaperExchange::new(dec!(10000), dec!(0)));
        let manager = Arc::new(StopLossManager::new(
            exchange.clone(),
            Arc::new(MemoryStorage::new()),
            StopLossConfig::default(),
        ));
        exchange.set_mark_price("BTC/USDT", dec!(100)).await;
        exchange
            .open_position("BTC/USDT", PositionSide::Long, dec!(1), 10)
            .await
            .unwrap();
        let position = Position::new(
            "BTC/USDT-1",
            "BTC/USDT",
            PositionSide::Long,
            dec!(100),
            dec!(1),
            10,
            dec!(97.5),
        )
        .with_trailing(dec!(0.03));
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss("BTC/USDT").await.unwrap();

        let monitor = PositionMonitor::new(manager.clone(), exchange.clone(), Duration::from_secs(1));
        (monitor, manager, exchange)
    }

    #[tokio::test]
    async fn test_trailing_follows_high_water_mark() {
        let (monitor, manager, exchange) = create_test_monitor().await;

        exchange.set_mark_price("BTC/USDT", dec!(110)).await;
        assert_eq!(monitor.monitor_once().await, 1);
        let position = manager.get_position("BTC/USDT").await.unwrap();
        assert_eq!(position.highest_price, dec!(110));
        assert_eq!(position.current_stop_loss, dec!(106.7));

        // pullback never loosens
        exchange.set_mark_price("BTC/USDT", dec!(108)).await;
        assert_eq!(monitor.monitor_once().await, 0);
        assert_eq!(
            manager.get_position("BTC/USDT").await.unwrap().current_stop_loss,
            dec!(106.7)
        );
    }

    #[tokio::test]
    async fn test_fired_stop_closes_tracked_position() {
        let (monitor, manager, exchange) = create_test_monitor().await;
        exchange.set_mark_price("BTC/USDT", dec!(95)).await;

        monitor.monitor_once().await;
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (monitor, _, _) = create_test_monitor().await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
