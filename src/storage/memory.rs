//! In-memory storage backend

use super::{BalanceSnapshot, PositionRecord, Storage, StorageDocument, TradingSession};
use crate::config::default_history_limit;
use crate::stoploss::StopLossEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage that lives only as long as the process
#[derive(Clone)]
pub struct MemoryStorage {
    doc: Arc<RwLock<StorageDocument>>,
    history_limit: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            doc: Arc::default(),
            history_limit: default_history_limit(),
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` balance snapshots and trading sessions
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Copy of everything stored
    pub async fn snapshot(&self) -> StorageDocument {
        self.doc.read().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_position(&self, record: &PositionRecord) -> anyhow::Result<()> {
        self.doc.write().await.insert_position(record)
    }

    async fn update_position(&self, record: &PositionRecord) -> anyhow::Result<()> {
        self.doc.write().await.update_position(record)
    }

    async fn get_active_positions(&self) -> anyhow::Result<Vec<PositionRecord>> {
        Ok(self.doc.read().await.active_positions())
    }

    async fn get_position(&self, id: &str) -> anyhow::Result<Option<PositionRecord>> {
        Ok(self.doc.read().await.positions.get(id).cloned())
    }

    async fn save_stop_loss_event(&self, event: &StopLossEvent) -> anyhow::Result<()> {
        self.doc.write().await.stop_loss_events.push(event.clone());
        Ok(())
    }

    async fn get_stop_loss_events(&self, position_id: &str) -> anyhow::Result<Vec<StopLossEvent>> {
        let doc = self.doc.read().await;
        Ok(doc
            .stop_loss_events
            .iter()
            .filter(|e| e.position_id == position_id)
            .cloned()
            .collect())
    }

    async fn save_balance_history(&self, snapshot: &BalanceSnapshot) -> anyhow::Result<()> {
        self.doc.write().await.push_balance(snapshot, self.history_limit);
        Ok(())
    }

    async fn latest_balance(&self) -> anyhow::Result<Option<BalanceSnapshot>> {
        Ok(self.doc.read().await.balance_history.last().cloned())
    }

    async fn save_trading_session(&self, session: &TradingSession) -> anyhow::Result<()> {
        self.doc.write().await.push_session(session, self.history_limit);
        Ok(())
    }
}
