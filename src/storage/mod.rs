//! Persistence module
//!
//! Durable mirror of the position registry, stop-loss audit trail,
//! balance history and per-cycle trading sessions. In-memory state is
//! authoritative; storage exists for restart recovery and inspection.

mod json_file;
mod memory;
mod types;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;
pub use types::{BalanceSnapshot, PositionRecord, StorageDocument, TradingSession};

use crate::config::StorageConfig;
use crate::stoploss::StopLossEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a newly opened position
    async fn save_position(&self, record: &PositionRecord) -> anyhow::Result<()>;
    /// Overwrite an existing position record
    async fn update_position(&self, record: &PositionRecord) -> anyhow::Result<()>;
    /// Positions not yet closed
    async fn get_active_positions(&self) -> anyhow::Result<Vec<PositionRecord>>;
    /// Any position by id, open or closed
    async fn get_position(&self, id: &str) -> anyhow::Result<Option<PositionRecord>>;
    /// Append a stop-loss change
    async fn save_stop_loss_event(&self, event: &StopLossEvent) -> anyhow::Result<()>;
    /// Stop-loss changes for one position, oldest first
    async fn get_stop_loss_events(&self, position_id: &str) -> anyhow::Result<Vec<StopLossEvent>>;
    /// Append a balance snapshot
    async fn save_balance_history(&self, snapshot: &BalanceSnapshot) -> anyhow::Result<()>;
    /// Most recent balance snapshot
    async fn latest_balance(&self) -> anyhow::Result<Option<BalanceSnapshot>>;
    /// Append a per-symbol cycle record
    async fn save_trading_session(&self, session: &TradingSession) -> anyhow::Result<()>;
}

/// Create the storage backend selected by configuration
pub async fn create_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn Storage>> {
    match &config.path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using JSON file storage");
            Ok(Arc::new(
                JsonFileStorage::open(path)
                    .await?
                    .with_history_limit(config.history_limit),
            ))
        }
        None => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(
                MemoryStorage::new().with_history_limit(config.history_limit),
            ))
        }
    }
}
