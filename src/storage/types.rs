//! Persisted record types

use crate::decision::Decision;
use crate::stoploss::{Position, PositionSide, PositionState, StopLossEvent, StopLossType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable mirror of a [`Position`], open or closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub quantity: Decimal,
    pub leverage: u32,
    pub initial_stop_loss: Decimal,
    pub current_stop_loss: Decimal,
    pub stop_loss_type: StopLossType,
    pub trailing_distance: Decimal,
    pub highest_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_reason: String,
    pub atr: Decimal,
    #[serde(default)]
    pub stop_order_id: Option<String>,
    pub closed: bool,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_price: Option<Decimal>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

impl PositionRecord {
    /// Snapshot of an open position
    pub fn from_position(position: &Position) -> Self {
        Self {
            id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            quantity: position.quantity,
            leverage: position.leverage,
            initial_stop_loss: position.initial_stop_loss,
            current_stop_loss: position.current_stop_loss,
            stop_loss_type: position.stop_loss_type,
            trailing_distance: position.trailing_distance,
            highest_price: position.highest_price,
            current_price: position.current_price,
            unrealized_pnl: position.unrealized_pnl,
            open_reason: position.open_reason.clone(),
            atr: position.atr,
            stop_order_id: position.stop_order_id.clone(),
            closed: position.state == PositionState::Closed,
            close_time: None,
            close_price: None,
            close_reason: None,
            realized_pnl: None,
        }
    }

    /// Rebuild the in-memory position; state follows the recorded stop order
    pub fn into_position(self) -> Position {
        let state = if self.closed {
            PositionState::Closed
        } else if self.stop_order_id.is_some() {
            PositionState::Protected
        } else {
            PositionState::Open
        };
        Position {
            id: self.id,
            symbol: self.symbol,
            side: self.side,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            quantity: self.quantity,
            leverage: self.leverage,
            initial_stop_loss: self.initial_stop_loss,
            current_stop_loss: self.current_stop_loss,
            stop_loss_type: self.stop_loss_type,
            trailing_distance: self.trailing_distance,
            highest_price: self.highest_price,
            current_price: self.current_price,
            unrealized_pnl: self.unrealized_pnl,
            open_reason: self.open_reason,
            atr: self.atr,
            state,
            stop_order_id: self.stop_order_id,
            stop_loss_history: vec![],
        }
    }
}

/// Account balance at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions: usize,
}

/// One symbol's decision and what came of it in a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSession {
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub decision: Decision,
    pub executed: bool,
    pub result: String,
}

/// Everything persisted, as one serializable document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageDocument {
    #[serde(default)]
    pub positions: BTreeMap<String, PositionRecord>,
    #[serde(default)]
    pub stop_loss_events: Vec<StopLossEvent>,
    #[serde(default)]
    pub balance_history: Vec<BalanceSnapshot>,
    #[serde(default)]
    pub sessions: Vec<TradingSession>,
}

impl StorageDocument {
    pub(super) fn insert_position(&mut self, record: &PositionRecord) -> anyhow::Result<()> {
        // closed records are history and are never overwritten either
        if self.positions.contains_key(&record.id) {
            anyhow::bail!("Position {} already stored", record.id);
        }
        self.positions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    pub(super) fn update_position(&mut self, record: &PositionRecord) -> anyhow::Result<()> {
        let slot = self
            .positions
            .get_mut(&record.id)
            .ok_or_else(|| anyhow::anyhow!("Position {} not found", record.id))?;
        *slot = record.clone();
        Ok(())
    }

    pub(super) fn active_positions(&self) -> Vec<PositionRecord> {
        self.positions.values().filter(|p| !p.closed).cloned().collect()
    }

    pub(super) fn push_balance(&mut self, snapshot: &BalanceSnapshot, limit: usize) {
        push_capped(&mut self.balance_history, snapshot.clone(), limit);
    }

    pub(super) fn push_session(&mut self, session: &TradingSession, limit: usize) {
        push_capped(&mut self.sessions, session.clone(), limit);
    }
}

/// Append, then drop the oldest entries beyond `limit`
fn push_capped<T>(items: &mut Vec<T>, item: T, limit: usize) {
    items.push(item);
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_position() -> Position {
        Position::new(
            "ETH/USDT-1700000000",
            "ETH/USDT",
            PositionSide::Short,
            dec!(2000),
            dec!(0.5),
            5,
            dec!(2050),
        )
        .with_trailing(dec!(0.03))
        .with_reason("breakdown")
    }

    #[test]
    fn test_record_conversion_preserves_fields() {
        let mut position = create_test_position();
        position.stop_order_id = Some("42".to_string());
        position.update_price(dec!(1950));

        let record = PositionRecord::from_position(&position);
        assert!(!record.closed);
        assert_eq!(record.highest_price, dec!(1950));

        let restored = record.into_position();
        assert_eq!(restored.id, position.id);
        assert_eq!(restored.side, PositionSide::Short);
        assert_eq!(restored.trailing_distance, dec!(0.03));
        assert_eq!(restored.unrealized_pnl, dec!(25));
        assert_eq!(restored.state, PositionState::Protected);
    }

    #[test]
    fn test_restored_without_stop_order_is_open() {
        let record = PositionRecord::from_position(&create_test_position());
        assert_eq!(record.into_position().state, PositionState::Open);
    }

    #[test]
    fn test_document_rejects_duplicate_id() {
        let mut doc = StorageDocument::default();
        let record = PositionRecord::from_position(&create_test_position());
        doc.insert_position(&record).unwrap();
        assert!(doc.insert_position(&record).is_err());

        let mut closed = record.clone();
        closed.closed = true;
        closed.realized_pnl = Some(dec!(12));
        doc.update_position(&closed).unwrap();
        assert!(doc.active_positions().is_empty());

        // a reopen under the same id must not erase the closed record
        assert!(doc.insert_position(&record).is_err());
        assert_eq!(doc.positions[&record.id].realized_pnl, Some(dec!(12)));
    }
}
