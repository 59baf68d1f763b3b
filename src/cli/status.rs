//! Status command implementation

use crate::config::Config;
use crate::storage::create_storage;

/// Print active positions and the last balance snapshot from storage
pub async fn show_status(config: &Config) -> anyhow::Result<()> {
    if config.storage.path.is_none() {
        println!("perp-guard status");
        println!("  Storage: in-memory (nothing persisted between runs)");
        return Ok(());
    }
    let storage = create_storage(&config.storage).await?;

    println!("perp-guard status");
    println!("  Mode: {:?}", config.exchange.mode);
    match storage.latest_balance().await? {
        Some(balance) => println!(
            "  Balance: {} total, {} available, {} unrealized ({})",
            balance.total_balance,
            balance.available_balance,
            balance.unrealized_pnl,
            balance.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("  Balance: no snapshot yet"),
    }

    let positions = storage.get_active_positions().await?;
    if positions.is_empty() {
        println!("  Positions: none");
        return Ok(());
    }
    println!("  Positions:");
    for record in positions {
        println!(
            "    {:<12} {:<5} qty {} entry {} stop {} ({:?}, {})",
            record.symbol,
            record.side.to_string(),
            record.quantity,
            record.entry_price,
            record.current_stop_loss,
            record.stop_loss_type,
            if record.stop_order_id.is_some() {
                "protected"
            } else {
                "unprotected"
            }
        );
    }
    Ok(())
}
