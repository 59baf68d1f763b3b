//! Position registry and stop-order lifecycle

use super::{Position, PositionState, StopLossError, StopLossEvent, StopTrigger};
use crate::config::StopLossConfig;
use crate::execution::{ExchangeGateway, ExchangePosition, GatewayError};
use crate::storage::{PositionRecord, Storage};
use crate::telemetry::{increment_counter, set_gauge, CounterMetric, GaugeMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Relative quantity drift tolerated before the exchange view overrides ours
const QUANTITY_TOLERANCE: Decimal = dec!(0.001);

/// Outcome of a stop-loss update request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopUpdate {
    /// Stop moved and a new resting order placed
    Applied { old: Decimal, new: Decimal },
    /// Candidate would loosen the stop; nothing changed
    Rejected { current: Decimal, attempted: Decimal },
    /// Favorable but smaller than the configured minimum change
    BelowThreshold { current: Decimal, attempted: Decimal },
}

/// A position removed from the registry by a close
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub close_time: DateTime<Utc>,
    pub close_price: Decimal,
    pub close_reason: String,
    pub realized_pnl: Decimal,
}

/// Owner of all active positions, keyed by symbol
///
/// Readers take the map's shared lock. Every mutation first takes the
/// `mutations` mutex, performs exchange calls without holding the map lock,
/// then re-checks the entry under the exclusive lock before writing.
pub struct StopLossManager {
    positions: RwLock<HashMap<String, Position>>,
    mutations: Mutex<()>,
    exchange: Arc<dyn ExchangeGateway>,
    storage: Arc<dyn Storage>,
    config: StopLossConfig,
}

impl StopLossManager {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        storage: Arc<dyn Storage>,
        config: StopLossConfig,
    ) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            mutations: Mutex::new(()),
            exchange,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &StopLossConfig {
        &self.config
    }

    /// Whether the local trailing monitor drives stops
    pub fn monitor_enabled(&self) -> bool {
        self.config.monitor_enabled
    }

    /// Insert a freshly opened position in state OPEN
    pub async fn register_position(&self, mut position: Position) -> Result<(), StopLossError> {
        let _guard = self.mutations.lock().await;
        {
            let mut positions = self.positions.write().await;
            if positions.contains_key(&position.symbol) {
                return Err(StopLossError::AlreadyRegistered(position.symbol));
            }
            if positions.values().any(|p| p.id == position.id) {
                return Err(StopLossError::DuplicateId(position.id));
            }

            position.state = PositionState::Open;
            position.highest_price = position.entry_price;
            position.current_price = position.entry_price;
            position.unrealized_pnl = Decimal::ZERO;
            position.stop_order_id = None;
            positions.insert(position.symbol.clone(), position.clone());
            set_gauge(GaugeMetric::OpenPositions, positions.len() as f64);
        }

        tracing::info!(
            id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            quantity = %position.quantity,
            stop = %position.current_stop_loss,
            "Position registered"
        );

        if let Err(e) = self
            .storage
            .save_position(&PositionRecord::from_position(&position))
            .await
        {
            persistence_warning(&position.symbol, "save_position", &e);
        }
        Ok(())
    }

    /// Place the resting stop for an OPEN position; no-op once protected
    pub async fn place_initial_stop_loss(&self, symbol: &str) -> Result<(), StopLossError> {
        let _guard = self.mutations.lock().await;
        let position = self
            .get_position(symbol)
            .await
            .ok_or_else(|| StopLossError::NotFound(symbol.to_string()))?;
        if position.state != PositionState::Open {
            return Ok(());
        }

        let stop = position.current_stop_loss;
        self.check_stop(&position, stop).await?;
        let order_id = self
            .exchange
            .place_stop_order(symbol, position.side, position.quantity, stop)
            .await
            .map_err(|e| {
                tracing::warn!(
                    symbol = %symbol,
                    stop = %stop,
                    error = %e,
                    "Stop order placement failed, position unprotected"
                );
                StopLossError::Exchange(e.to_string())
            })?;

        let record = {
            let mut positions = self.positions.write().await;
            let entry = positions
                .get_mut(symbol)
                .filter(|p| p.id == position.id)
                .ok_or_else(|| StopLossError::NotFound(symbol.to_string()))?;
            entry.stop_order_id = Some(order_id.clone());
            entry.state = PositionState::Protected;
            PositionRecord::from_position(entry)
        };

        tracing::info!(symbol = %symbol, stop = %stop, order_id = %order_id, "Initial stop-loss placed");
        self.persist_update(symbol, &record).await;
        Ok(())
    }

    /// Move the stop if `new_stop` tightens it
    ///
    /// Loosening requests are logged and ignored. When the replacement order
    /// cannot be placed the new stop is still recorded and the position drops
    /// back to OPEN so the next cycle retries protection.
    pub async fn update_stop_loss(
        &self,
        symbol: &str,
        new_stop: Decimal,
        reason: &str,
        trigger: StopTrigger,
    ) -> Result<StopUpdate, StopLossError> {
        let _guard = self.mutations.lock().await;
        let position = self
            .get_position(symbol)
            .await
            .ok_or_else(|| StopLossError::NotFound(symbol.to_string()))?;
        let current = position.current_stop_loss;

        if new_stop <= Decimal::ZERO {
            return Err(StopLossError::InvalidStop(new_stop));
        }
        if !position.is_more_favorable(new_stop) {
            tracing::info!(
                symbol = %symbol,
                side = %position.side,
                current = %current,
                attempted = %new_stop,
                reason = %reason,
                "Stop-loss update rejected, would loosen the stop"
            );
            return Ok(StopUpdate::Rejected {
                current,
                attempted: new_stop,
            });
        }
        if self.config.min_change_pct > Decimal::ZERO && !current.is_zero() {
            let change = ((new_stop - current) / current).abs();
            if change < self.config.min_change_pct {
                tracing::debug!(symbol = %symbol, change = %change, "Stop-loss change below threshold");
                return Ok(StopUpdate::BelowThreshold {
                    current,
                    attempted: new_stop,
                });
            }
        }
        self.check_stop(&position, new_stop).await?;

        if let Some(order_id) = &position.stop_order_id {
            match self.exchange.cancel_order(symbol, order_id).await {
                Ok(()) => {}
                Err(e) if GatewayError::is_unknown_order(&e) => {
                    tracing::debug!(symbol = %symbol, order_id = %order_id, "Previous stop order already gone");
                }
                Err(e) => {
                    // a second resting stop could later close a different position
                    tracing::warn!(
                        symbol = %symbol,
                        order_id = %order_id,
                        error = %e,
                        "Failed to cancel previous stop order, keeping current stop"
                    );
                    return Err(StopLossError::Exchange(e.to_string()));
                }
            }
        }
        let placed = self
            .exchange
            .place_stop_order(symbol, position.side, position.quantity, new_stop)
            .await;

        let event = StopLossEvent {
            id: Uuid::new_v4(),
            position_id: position.id.clone(),
            timestamp: Utc::now(),
            old_stop: current,
            new_stop,
            reason: reason.to_string(),
            trigger,
        };

        let record = {
            let mut positions = self.positions.write().await;
            let entry = positions
                .get_mut(symbol)
                .filter(|p| p.id == position.id)
                .ok_or_else(|| StopLossError::NotFound(symbol.to_string()))?;
            entry.current_stop_loss = new_stop;
            entry.stop_loss_history.push(event.clone());
            match &placed {
                Ok(order_id) => {
                    entry.stop_order_id = Some(order_id.clone());
                    entry.state = PositionState::Trailed;
                }
                Err(_) => {
                    entry.stop_order_id = None;
                    entry.state = PositionState::Open;
                }
            }
            PositionRecord::from_position(entry)
        };

        increment_counter(CounterMetric::StopLossUpdates, symbol);
        self.persist_update(symbol, &record).await;
        if let Err(e) = self.storage.save_stop_loss_event(&event).await {
            persistence_warning(symbol, "save_stop_loss_event", &e);
        }

        match placed {
            Ok(order_id) => {
                tracing::info!(
                    symbol = %symbol,
                    old = %current,
                    new = %new_stop,
                    order_id = %order_id,
                    trigger = ?trigger,
                    reason = %reason,
                    "Stop-loss moved"
                );
                Ok(StopUpdate::Applied {
                    old: current,
                    new: new_stop,
                })
            }
            Err(e) => {
                tracing::warn!(
                    symbol = %symbol,
                    stop = %new_stop,
                    error = %e,
                    "Stop moved but replacement order failed, position unprotected"
                );
                Err(StopLossError::Exchange(e.to_string()))
            }
        }
    }

    /// Remove a position, cancel its stop and record the close
    ///
    /// Closing a symbol with no active position returns `None`.
    pub async fn close_position(
        &self,
        symbol: &str,
        close_price: Decimal,
        reason: &str,
        realized_pnl: Decimal,
    ) -> Option<ClosedPosition> {
        let _guard = self.mutations.lock().await;
        self.close_locked(symbol, close_price, reason, realized_pnl, true)
            .await
    }

    async fn close_locked(
        &self,
        symbol: &str,
        close_price: Decimal,
        reason: &str,
        realized_pnl: Decimal,
        cancel_stop: bool,
    ) -> Option<ClosedPosition> {
        let removed = {
            let mut positions = self.positions.write().await;
            let removed = positions.remove(symbol);
            set_gauge(GaugeMetric::OpenPositions, positions.len() as f64);
            removed
        };
        let Some(mut position) = removed else {
            tracing::debug!(symbol = %symbol, "Close ignored, no active position");
            return None;
        };

        if cancel_stop {
            if let Some(order_id) = &position.stop_order_id {
                if let Err(e) = self.exchange.cancel_order(symbol, order_id).await {
                    tracing::warn!(symbol = %symbol, order_id = %order_id, error = %e, "Failed to cancel stop order on close");
                }
            }
        }

        position.state = PositionState::Closed;
        position.current_price = close_price;
        let close_time = Utc::now();

        let mut record = PositionRecord::from_position(&position);
        record.close_time = Some(close_time);
        record.close_price = Some(close_price);
        record.close_reason = Some(reason.to_string());
        record.realized_pnl = Some(realized_pnl);
        self.persist_update(symbol, &record).await;

        increment_counter(CounterMetric::PositionsClosed, symbol);
        tracing::info!(
            id = %position.id,
            symbol = %symbol,
            price = %close_price,
            pnl = %realized_pnl,
            reason = %reason,
            "Position closed"
        );

        Some(ClosedPosition {
            position,
            close_time,
            close_price,
            close_reason: reason.to_string(),
            realized_pnl,
        })
    }

    pub async fn get_position(&self, symbol: &str) -> Option<Position> {
        self.positions.read().await.get(symbol).cloned()
    }

    /// Snapshot of every active position, ordered by symbol
    pub async fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }

    /// Record a new mark price; returns the refreshed position
    pub async fn refresh_price(&self, symbol: &str, price: Decimal) -> Option<Position> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(symbol)?;
        position.update_price(price);
        Some(position.clone())
    }

    /// Retry stop placement for every position left unprotected
    pub async fn retry_unprotected(&self) -> usize {
        let unprotected: Vec<String> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.state == PositionState::Open)
            .map(|p| p.symbol.clone())
            .collect();

        let mut protected = 0;
        for symbol in unprotected {
            match self.place_initial_stop_loss(&symbol).await {
                Ok(()) => protected += 1,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Stop placement retry failed")
                }
            }
        }
        protected
    }

    /// Align a tracked position with the exchange's view
    ///
    /// A protected position missing on the exchange was taken out by its
    /// resting stop and is closed at the stop price; an unprotected one is
    /// closed at the current mark. A side or quantity mismatch adopts the
    /// exchange's numbers.
    pub async fn reconcile(
        &self,
        symbol: &str,
        live: Option<&ExchangePosition>,
    ) -> Option<ClosedPosition> {
        let _guard = self.mutations.lock().await;
        let tracked = self.get_position(symbol).await?;

        let Some(live) = live else {
            let (price, reason) = if tracked.stop_order_id.is_some() {
                // the resting stop is what took the position off the exchange
                (tracked.current_stop_loss, "stop-loss triggered on exchange")
            } else {
                let price = match self.exchange.current_price(symbol).await {
                    Ok(price) if price > Decimal::ZERO => price,
                    Ok(_) | Err(_) => tracked.current_price,
                };
                (price, "position closed outside the engine")
            };
            let pnl = tracked.side.pnl(tracked.entry_price, price, tracked.quantity);
            tracing::warn!(symbol = %symbol, price = %price, reason = %reason, "Position no longer on exchange");
            return self.close_locked(symbol, price, reason, pnl, false).await;
        };

        let drifted = tracked.quantity.is_zero()
            || ((live.quantity - tracked.quantity) / tracked.quantity).abs() > QUANTITY_TOLERANCE;
        if live.side != tracked.side || drifted {
            tracing::warn!(
                symbol = %symbol,
                tracked_side = %tracked.side,
                live_side = %live.side,
                tracked_quantity = %tracked.quantity,
                live_quantity = %live.quantity,
                "Tracked position differs from exchange, adopting exchange view"
            );
            let record = {
                let mut positions = self.positions.write().await;
                let entry = positions.get_mut(symbol)?;
                entry.side = live.side;
                entry.quantity = live.quantity;
                entry.entry_price = live.entry_price;
                if !live.mark_price.is_zero() {
                    entry.update_price(live.mark_price);
                }
                PositionRecord::from_position(entry)
            };
            self.persist_update(symbol, &record).await;
        }
        None
    }

    /// Load active positions from storage after a restart
    pub async fn rehydrate(&self) -> anyhow::Result<usize> {
        let records = self.storage.get_active_positions().await?;
        let mut restored = Vec::with_capacity(records.len());
        for record in records {
            let mut position = record.into_position();
            position.stop_loss_history = self
                .storage
                .get_stop_loss_events(&position.id)
                .await
                .unwrap_or_default();
            restored.push(position);
        }

        let _guard = self.mutations.lock().await;
        let mut positions = self.positions.write().await;
        let mut count = 0;
        for position in restored {
            if positions.contains_key(&position.symbol) {
                tracing::warn!(symbol = %position.symbol, id = %position.id, "Skipping duplicate active record");
                continue;
            }
            tracing::info!(
                id = %position.id,
                symbol = %position.symbol,
                state = ?position.state,
                stop = %position.current_stop_loss,
                "Position restored"
            );
            positions.insert(position.symbol.clone(), position);
            count += 1;
        }
        set_gauge(GaugeMetric::OpenPositions, positions.len() as f64);
        Ok(count)
    }

    /// Reject stops that are already through the mark
    async fn check_stop(&self, position: &Position, stop: Decimal) -> Result<(), StopLossError> {
        if stop <= Decimal::ZERO {
            return Err(StopLossError::InvalidStop(stop));
        }
        let mark = match self.exchange.current_price(&position.symbol).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "Mark price unavailable, using last known");
                position.current_price
            }
        };
        if position.stop_would_trigger_at(stop, mark) {
            return Err(StopLossError::WouldTriggerImmediately {
                side: position.side,
                stop,
                mark,
            });
        }
        Ok(())
    }

    async fn persist_update(&self, symbol: &str, record: &PositionRecord) {
        if let Err(e) = self.storage.update_position(record).await {
            persistence_warning(symbol, "update_position", &e);
        }
    }
}

fn persistence_warning(symbol: &str, operation: &str, error: &anyhow::Error) {
    increment_counter(CounterMetric::PersistenceWarnings, symbol);
    tracing::warn!(
        symbol = %symbol,
        operation = operation,
        error = %error,
        "Persistence failed, keeping in-memory state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperExchange;
    use crate::stoploss::{PositionSide, StopLossType};
    use crate::storage::MemoryStorage;

    const SYMBOL: &str = "BTC/USDT";

    fn create_test_manager(
        config: StopLossConfig,
    ) -> (StopLossManager, Arc<PaperExchange>, Arc<MemoryStorage>) {
        let exchange = Arc::new(PaperExchange::new(dec!(10000), dec!(0)));
        let storage = Arc::new(MemoryStorage::new());
        let manager = StopLossManager::new(exchange.clone(), storage.clone(), config);
        (manager, exchange, storage)
    }

    async fn create_test_position(exchange: &PaperExchange, side: PositionSide) -> Position {
        exchange.set_mark_price(SYMBOL, dec!(100)).await;
        exchange
            .open_position(SYMBOL, side, dec!(1), 10)
            .await
            .unwrap();
        let stop = side.stop_from(dec!(100), dec!(0.025));
        Position::new("BTC/USDT-1", SYMBOL, side, dec!(100), dec!(1), 10, stop)
            .with_trailing(dec!(0.03))
    }

    #[tokio::test]
    async fn test_register_rejects_second_position_on_symbol() {
        let (manager, exchange, storage) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position.clone()).await.unwrap();

        let mut second = position.clone();
        second.id = "BTC/USDT-2".to_string();
        assert_eq!(
            manager.register_position(second).await,
            Err(StopLossError::AlreadyRegistered(SYMBOL.to_string()))
        );
        assert_eq!(manager.len().await, 1);
        assert_eq!(storage.snapshot().await.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_reused_id() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position.clone()).await.unwrap();

        let mut other = position;
        other.symbol = "ETH/USDT".to_string();
        assert!(matches!(
            manager.register_position(other).await,
            Err(StopLossError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_initial_stop_is_idempotent() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();

        manager.place_initial_stop_loss(SYMBOL).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        let tracked = manager.get_position(SYMBOL).await.unwrap();
        assert_eq!(tracked.state, PositionState::Protected);
        assert!(tracked.stop_order_id.is_some());
        let orders = exchange.stop_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].stop_price, dec!(97.5));
    }

    #[tokio::test]
    async fn test_stop_through_mark_rejected() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let mut position = create_test_position(&exchange, PositionSide::Long).await;
        position.current_stop_loss = dec!(101);
        manager.register_position(position).await.unwrap();

        assert!(matches!(
            manager.place_initial_stop_loss(SYMBOL).await,
            Err(StopLossError::WouldTriggerImmediately { .. })
        ));
        assert_eq!(
            manager.get_position(SYMBOL).await.unwrap().state,
            PositionState::Open
        );
    }

    #[tokio::test]
    async fn test_failed_placement_leaves_position_open_then_retry() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Short).await;
        manager.register_position(position).await.unwrap();

        exchange.reject_orders(true).await;
        assert!(matches!(
            manager.place_initial_stop_loss(SYMBOL).await,
            Err(StopLossError::Exchange(_))
        ));
        assert_eq!(manager.len().await, 1);
        assert_eq!(manager.retry_unprotected().await, 0);

        exchange.reject_orders(false).await;
        assert_eq!(manager.retry_unprotected().await, 1);
        assert_eq!(
            manager.get_position(SYMBOL).await.unwrap().state,
            PositionState::Protected
        );
    }

    #[tokio::test]
    async fn test_update_ratchets_long() {
        let (manager, exchange, storage) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        let applied = manager
            .update_stop_loss(SYMBOL, dec!(98), "raise", StopTrigger::Decision)
            .await
            .unwrap();
        assert_eq!(
            applied,
            StopUpdate::Applied {
                old: dec!(97.5),
                new: dec!(98)
            }
        );

        let rejected = manager
            .update_stop_loss(SYMBOL, dec!(96), "loosen", StopTrigger::Decision)
            .await
            .unwrap();
        assert!(matches!(rejected, StopUpdate::Rejected { .. }));

        let tracked = manager.get_position(SYMBOL).await.unwrap();
        assert_eq!(tracked.current_stop_loss, dec!(98));
        assert_eq!(tracked.state, PositionState::Trailed);
        assert_eq!(tracked.stop_loss_history.len(), 1);

        let orders = exchange.stop_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].stop_price, dec!(98));
        assert_eq!(storage.get_stop_loss_events(&tracked.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_stop_when_cancel_fails() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();
        let before = manager.get_position(SYMBOL).await.unwrap();

        exchange.reject_cancels(true).await;
        assert!(matches!(
            manager
                .update_stop_loss(SYMBOL, dec!(98), "raise", StopTrigger::Decision)
                .await,
            Err(StopLossError::Exchange(_))
        ));

        let tracked = manager.get_position(SYMBOL).await.unwrap();
        assert_eq!(tracked.current_stop_loss, dec!(97.5));
        assert_eq!(tracked.stop_order_id, before.stop_order_id);
        assert_eq!(tracked.state, PositionState::Protected);
        assert!(tracked.stop_loss_history.is_empty());
        let orders = exchange.stop_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].stop_price, dec!(97.5));
    }

    #[tokio::test]
    async fn test_update_replaces_stop_already_gone() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        // cancelled by hand on the exchange
        let order_id = manager.get_position(SYMBOL).await.unwrap().stop_order_id.unwrap();
        exchange.cancel_order(SYMBOL, &order_id).await.unwrap();

        let update = manager
            .update_stop_loss(SYMBOL, dec!(98), "raise", StopTrigger::Decision)
            .await
            .unwrap();
        assert!(matches!(update, StopUpdate::Applied { .. }));
        let orders = exchange.stop_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].stop_price, dec!(98));
    }

    #[tokio::test]
    async fn test_update_ratchets_short() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Short).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        for (candidate, expected) in [
            (dec!(102), dec!(102)),
            (dec!(104), dec!(102)),
            (dec!(101), dec!(101)),
            (dec!(101.5), dec!(101)),
        ] {
            manager
                .update_stop_loss(SYMBOL, candidate, "trail", StopTrigger::Program)
                .await
                .unwrap();
            assert_eq!(
                manager.get_position(SYMBOL).await.unwrap().current_stop_loss,
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_update_below_threshold_skipped() {
        let config = StopLossConfig {
            min_change_pct: dec!(0.01),
            ..StopLossConfig::default()
        };
        let (manager, exchange, _) = create_test_manager(config);
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        let outcome = manager
            .update_stop_loss(SYMBOL, dec!(97.6), "tiny", StopTrigger::Program)
            .await
            .unwrap();
        assert!(matches!(outcome, StopUpdate::BelowThreshold { .. }));
    }

    #[tokio::test]
    async fn test_update_unknown_symbol() {
        let (manager, _, _) = create_test_manager(StopLossConfig::default());
        assert_eq!(
            manager
                .update_stop_loss(SYMBOL, dec!(1), "x", StopTrigger::Decision)
                .await,
            Err(StopLossError::NotFound(SYMBOL.to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (manager, exchange, storage) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        let id = position.id.clone();
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        let closed = manager
            .close_position(SYMBOL, dec!(105), "take profit", dec!(5))
            .await
            .unwrap();
        assert_eq!(closed.realized_pnl, dec!(5));
        assert_eq!(closed.position.state, PositionState::Closed);
        assert!(exchange.stop_orders().await.is_empty());

        assert!(manager
            .close_position(SYMBOL, dec!(105), "take profit", dec!(5))
            .await
            .is_none());
        assert!(manager.is_empty().await);

        let record = storage.get_position(&id).await.unwrap().unwrap();
        assert!(record.closed);
        assert_eq!(record.close_price, Some(dec!(105)));
        assert_eq!(record.realized_pnl, Some(dec!(5)));
        assert!(storage.get_active_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_closes_when_stop_fired() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();

        // the tracked mark is never refreshed, so the close must not use it
        exchange.set_mark_price(SYMBOL, dec!(97)).await;
        let live = exchange.get_current_position(SYMBOL).await.unwrap();
        assert!(live.is_none());

        let closed = manager.reconcile(SYMBOL, live.as_ref()).await.unwrap();
        assert_eq!(closed.close_price, dec!(97.5));
        assert_eq!(closed.realized_pnl, dec!(-2.5));
        assert_eq!(closed.close_reason, "stop-loss triggered on exchange");
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_reconcile_unprotected_closes_at_mark() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();

        exchange.set_mark_price(SYMBOL, dec!(99)).await;
        exchange.force_flat(SYMBOL).await;

        let closed = manager.reconcile(SYMBOL, None).await.unwrap();
        assert_eq!(closed.close_price, dec!(99));
        assert_eq!(closed.realized_pnl, dec!(-1));
        assert_eq!(closed.close_reason, "position closed outside the engine");
    }

    #[tokio::test]
    async fn test_reconcile_adopts_exchange_quantity() {
        let (manager, exchange, _) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();

        exchange
            .open_position(SYMBOL, PositionSide::Long, dec!(1), 10)
            .await
            .unwrap();
        let live = exchange.get_current_position(SYMBOL).await.unwrap();
        assert!(manager.reconcile(SYMBOL, live.as_ref()).await.is_none());
        assert_eq!(
            manager.get_position(SYMBOL).await.unwrap().quantity,
            dec!(2)
        );
    }

    #[tokio::test]
    async fn test_rehydrate_restores_active_positions() {
        let (manager, exchange, storage) = create_test_manager(StopLossConfig::default());
        let position = create_test_position(&exchange, PositionSide::Long).await;
        manager.register_position(position).await.unwrap();
        manager.place_initial_stop_loss(SYMBOL).await.unwrap();
        manager
            .update_stop_loss(SYMBOL, dec!(99), "raise", StopTrigger::Decision)
            .await
            .unwrap();

        let restarted = StopLossManager::new(exchange, storage, StopLossConfig::default());
        assert_eq!(restarted.rehydrate().await.unwrap(), 1);

        let restored = restarted.get_position(SYMBOL).await.unwrap();
        assert_eq!(restored.current_stop_loss, dec!(99));
        assert_eq!(restored.state, PositionState::Protected);
        assert_eq!(restored.stop_loss_type, StopLossType::Trailing);
        assert_eq!(restored.stop_loss_history.len(), 1);
    }
}
