//! JSON document storage backend
//!
//! The whole document is rewritten on every mutation through a temporary
//! file and a rename, so a crash never leaves a half-written file behind.

use super::{BalanceSnapshot, PositionRecord, Storage, StorageDocument, TradingSession};
use crate::config::default_history_limit;
use crate::stoploss::StopLossEvent;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Storage persisted as a single JSON file
pub struct JsonFileStorage {
    path: PathBuf,
    doc: Mutex<StorageDocument>,
    history_limit: usize,
}

impl JsonFileStorage {
    /// Open the document at `path`, starting empty if it does not exist
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
            history_limit: default_history_limit(),
        })
    }

    /// Keep at most `limit` balance snapshots and trading sessions
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    async fn persist(&self, doc: &StorageDocument) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `f` to the document and write it out
    async fn mutate<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut StorageDocument) -> anyhow::Result<()> + Send,
    {
        let mut doc = self.doc.lock().await;
        f(&mut *doc)?;
        self.persist(&*doc).await
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn save_position(&self, record: &PositionRecord) -> anyhow::Result<()> {
        self.mutate(|doc| doc.insert_position(record)).await
    }

    async fn update_position(&self, record: &PositionRecord) -> anyhow::Result<()> {
        self.mutate(|doc| doc.update_position(record)).await
    }

    async fn get_active_positions(&self) -> anyhow::Result<Vec<PositionRecord>> {
        Ok(self.doc.lock().await.active_positions())
    }

    async fn get_position(&self, id: &str) -> anyhow::Result<Option<PositionRecord>> {
        Ok(self.doc.lock().await.positions.get(id).cloned())
    }

    async fn save_stop_loss_event(&self, event: &StopLossEvent) -> anyhow::Result<()> {
        self.mutate(|doc| {
            doc.stop_loss_events.push(event.clone());
            Ok(())
        })
        .await
    }

    async fn get_stop_loss_events(&self, position_id: &str) -> anyhow::Result<Vec<StopLossEvent>> {
        let doc = self.doc.lock().await;
        Ok(doc
            .stop_loss_events
            .iter()
            .filter(|e| e.position_id == position_id)
            .cloned()
            .collect())
    }

    async fn save_balance_history(&self, snapshot: &BalanceSnapshot) -> anyhow::Result<()> {
        let limit = self.history_limit;
        self.mutate(|doc| {
            doc.push_balance(snapshot, limit);
            Ok(())
        })
        .await
    }

    async fn latest_balance(&self) -> anyhow::Result<Option<BalanceSnapshot>> {
        Ok(self.doc.lock().await.balance_history.last().cloned())
    }

    async fn save_trading_session(&self, session: &TradingSession) -> anyhow::Result<()> {
        let limit = self.history_limit;
        self.mutate(|doc| {
            doc.push_session(session, limit);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stoploss::{Position, PositionSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reopen_restores_active_positions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let storage = JsonFileStorage::open(&path).await.unwrap();
            let position = Position::new("BTC/USDT-1", "BTC/USDT", PositionSide::Long, dec!(100), dec!(1), 10, dec!(97.5));
            storage
                .save_position(&PositionRecord::from_position(&position))
                .await
                .unwrap();
        }

        let reopened = JsonFileStorage::open(&path).await.unwrap();
        let active = reopened.get_active_positions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].entry_price, dec!(100));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("absent.json")).await.unwrap();
        assert!(storage.get_active_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStorage::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_mutation_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let storage = JsonFileStorage::open(&path).await.unwrap();
        let position = Position::new("x", "BTC/USDT", PositionSide::Long, dec!(100), dec!(1), 10, dec!(97.5));

        let result = storage
            .update_position(&PositionRecord::from_position(&position))
            .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_balance_history_capped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let storage = JsonFileStorage::open(&path).await.unwrap().with_history_limit(3);

        for total in 1..=5 {
            let snapshot = BalanceSnapshot {
                timestamp: chrono::Utc::now(),
                total_balance: Decimal::from(total),
                available_balance: Decimal::from(total),
                unrealized_pnl: Decimal::ZERO,
                positions: 0,
            };
            storage.save_balance_history(&snapshot).await.unwrap();
        }
        drop(storage);

        let content = std::fs::read_to_string(&path).unwrap();
        let doc: StorageDocument = serde_json::from_str(&content).unwrap();
        let totals: Vec<Decimal> = doc.balance_history.iter().map(|b| b.total_balance).collect();
        assert_eq!(totals, vec![dec!(3), dec!(4), dec!(5)]);
    }
}
