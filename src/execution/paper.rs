//! Paper trading gateway with simulated fills

use super::{
    exchange_symbol, AccountInfo, ExchangeGateway, ExchangePosition, Fill, GatewayError,
    MarginType, OrderId, OrderSide, PriceFeed, StopOrder,
};
use crate::stoploss::PositionSide;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct PaperState {
    wallet_balance: Decimal,
    marks: HashMap<String, Decimal>,
    positions: HashMap<String, ExchangePosition>,
    stop_orders: HashMap<OrderId, StopOrder>,
    margin_types: HashMap<String, MarginType>,
    fills: Vec<Fill>,
    reject_orders: bool,
    reject_cancels: bool,
}

impl PaperState {
    fn mark(&self, key: &str) -> anyhow::Result<Decimal> {
        self.marks
            .get(key)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No price for {}", key))
    }

    fn used_margin(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.quantity * p.entry_price / Decimal::from(p.leverage.max(1)))
            .sum()
    }

    fn unrealized(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    fn record_fill(&mut self, key: &str, side: OrderSide, price: Decimal, quantity: Decimal, fees: Decimal) -> Fill {
        let fill = Fill {
            order_id: Uuid::new_v4().to_string(),
            symbol: key.to_string(),
            side,
            price,
            quantity,
            fees,
            timestamp: Utc::now(),
        };
        self.fills.push(fill.clone());
        fill
    }

    /// Reduce `key` by `quantity` at `price`, settling PnL into the wallet
    fn reduce(&mut self, key: &str, quantity: Decimal, price: Decimal, fee_rate: Decimal) -> anyhow::Result<Fill> {
        let position = self
            .positions
            .get_mut(key)
            .ok_or_else(|| anyhow::anyhow!("No open position for {}", key))?;
        let quantity = quantity.min(position.quantity);
        let side = position.side;
        let pnl = side.pnl(position.entry_price, price, quantity);
        position.quantity -= quantity;
        let flat = position.quantity.is_zero();

        if flat {
            self.positions.remove(key);
            self.stop_orders.retain(|_, o| o.symbol != key);
        } else if let Some(p) = self.positions.get_mut(key) {
            p.unrealized_pnl = side.pnl(p.entry_price, price, p.quantity);
        }

        let fees = quantity * price * fee_rate;
        self.wallet_balance += pnl - fees;
        Ok(self.record_fill(key, OrderSide::closing(side), price, quantity, fees))
    }
}

/// Paper trading gateway with an in-process simulated account
///
/// Marks are driven with [`PaperExchange::set_mark_price`] or pulled from an
/// attached [`PriceFeed`]; crossing a resting stop closes the position at the
/// stop price, as the exchange would.
#[derive(Clone)]
pub struct PaperExchange {
    fee_rate: Decimal,
    state: Arc<RwLock<PaperState>>,
    feed: Option<Arc<dyn PriceFeed>>,
}

impl PaperExchange {
    /// Create a new paper gateway with a starting wallet balance
    pub fn new(balance: Decimal, fee_rate: Decimal) -> Self {
        let state = PaperState {
            wallet_balance: balance,
            ..PaperState::default()
        };
        Self {
            fee_rate,
            state: Arc::new(RwLock::new(state)),
            feed: None,
        }
    }

    /// Pull marks from a live price source before every price-dependent call
    pub fn with_price_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    async fn sync_mark(&self, symbol: &str) {
        let Some(feed) = &self.feed else {
            return;
        };
        match feed.price(symbol).await {
            Ok(price) => self.set_mark_price(symbol, price).await,
            Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Price feed failed, keeping last mark"),
        }
    }

    /// Move the mark price, revaluing the position and firing crossed stops
    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) {
        let key = exchange_symbol(symbol);
        let mut state = self.state.write().await;
        state.marks.insert(key.clone(), price);

        if let Some(position) = state.positions.get_mut(&key) {
            position.mark_price = price;
            position.unrealized_pnl = position.side.pnl(position.entry_price, price, position.quantity);
        }

        let triggered: Vec<StopOrder> = state
            .stop_orders
            .values()
            .filter(|o| {
                o.symbol == key
                    && match o.position_side {
                        PositionSide::Long => price <= o.stop_price,
                        PositionSide::Short => price >= o.stop_price,
                    }
            })
            .cloned()
            .collect();

        for order in triggered {
            state.stop_orders.remove(&order.order_id);
            if state.positions.contains_key(&key) {
                match state.reduce(&key, order.quantity, order.stop_price, self.fee_rate) {
                    Ok(fill) => tracing::info!(
                        symbol = %key,
                        order_id = %order.order_id,
                        price = %fill.price,
                        "Paper stop order triggered"
                    ),
                    Err(e) => tracing::warn!(symbol = %key, error = %e, "Paper stop fill failed"),
                }
            }
        }
    }

    /// Set the margin mode reported for a symbol
    pub async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) {
        let mut state = self.state.write().await;
        state.margin_types.insert(exchange_symbol(symbol), margin_type);
    }

    /// Make subsequent market and stop orders fail
    pub async fn reject_orders(&self, reject: bool) {
        self.state.write().await.reject_orders = reject;
    }

    /// Make subsequent cancels fail as if the exchange were unreachable
    pub async fn reject_cancels(&self, reject: bool) {
        self.state.write().await.reject_cancels = reject;
    }

    /// Remove a position behind the engine's back (manual close, liquidation)
    pub async fn force_flat(&self, symbol: &str) {
        let key = exchange_symbol(symbol);
        let mut state = self.state.write().await;
        state.positions.remove(&key);
        state.stop_orders.retain(|_, o| o.symbol != key);
    }

    /// Resting stop orders
    pub async fn stop_orders(&self) -> Vec<StopOrder> {
        self.state.read().await.stop_orders.values().cloned().collect()
    }

    /// All fills so far
    pub async fn fills(&self) -> Vec<Fill> {
        self.state.read().await.fills.clone()
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_account_info(&self) -> anyhow::Result<AccountInfo> {
        let state = self.state.read().await;
        let unrealized = state.unrealized();
        let total = state.wallet_balance + unrealized;
        Ok(AccountInfo {
            total_balance: total,
            available_balance: (total - state.used_margin()).max(Decimal::ZERO),
            unrealized_pnl: unrealized,
        })
    }

    async fn get_current_position(&self, symbol: &str) -> anyhow::Result<Option<ExchangePosition>> {
        self.sync_mark(symbol).await;
        let state = self.state.read().await;
        Ok(state.positions.get(&exchange_symbol(symbol)).cloned())
    }

    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.sync_mark(symbol).await;
        self.state.read().await.mark(&exchange_symbol(symbol))
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        leverage: u32,
    ) -> anyhow::Result<Fill> {
        self.sync_mark(symbol).await;
        let key = exchange_symbol(symbol);
        let mut state = self.state.write().await;
        if state.reject_orders {
            anyhow::bail!("Paper order rejected for {}", key);
        }
        if quantity <= Decimal::ZERO {
            anyhow::bail!("Invalid quantity {}", quantity);
        }
        let price = state.mark(&key)?;

        match state.positions.get_mut(&key) {
            Some(existing) if existing.side != side => {
                anyhow::bail!("Opposite {} position open on {}", existing.side, key);
            }
            Some(existing) => {
                let total = existing.quantity + quantity;
                existing.entry_price =
                    (existing.entry_price * existing.quantity + price * quantity) / total;
                existing.quantity = total;
                existing.leverage = leverage;
            }
            None => {
                state.positions.insert(
                    key.clone(),
                    ExchangePosition {
                        symbol: key.clone(),
                        side,
                        quantity,
                        entry_price: price,
                        mark_price: price,
                        unrealized_pnl: Decimal::ZERO,
                        leverage,
                    },
                );
            }
        }

        let fees = quantity * price * self.fee_rate;
        state.wallet_balance -= fees;
        let fill = state.record_fill(&key, OrderSide::opening(side), price, quantity, fees);

        tracing::info!(order_id = %fill.order_id, symbol = %key, %side, %quantity, %price, "Paper order filled");
        Ok(fill)
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
    ) -> anyhow::Result<Fill> {
        self.sync_mark(symbol).await;
        let key = exchange_symbol(symbol);
        let mut state = self.state.write().await;
        if state.reject_orders {
            anyhow::bail!("Paper order rejected for {}", key);
        }
        match state.positions.get(&key) {
            Some(p) if p.side == side => {}
            _ => anyhow::bail!("No {} position on {}", side, key),
        }
        let price = state.mark(&key)?;
        let fill = state.reduce(&key, quantity, price, self.fee_rate)?;

        tracing::info!(order_id = %fill.order_id, symbol = %key, %side, %price, "Paper position closed");
        Ok(fill)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> anyhow::Result<OrderId> {
        let key = exchange_symbol(symbol);
        let mut state = self.state.write().await;
        if state.reject_orders {
            anyhow::bail!("Paper stop order rejected for {}", key);
        }
        if !state.positions.contains_key(&key) {
            anyhow::bail!("Reduce-only stop rejected: no position on {}", key);
        }

        let order_id = Uuid::new_v4().to_string();
        state.stop_orders.insert(
            order_id.clone(),
            StopOrder {
                order_id: order_id.clone(),
                symbol: key,
                position_side: side,
                quantity,
                stop_price,
            },
        );

        tracing::debug!(%order_id, %stop_price, "Paper stop order placed");
        Ok(order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if state.reject_cancels {
            anyhow::bail!("Paper cancel rejected for {}", exchange_symbol(symbol));
        }
        if state.stop_orders.remove(order_id).is_none() {
            return Err(GatewayError::UnknownOrder {
                symbol: exchange_symbol(symbol),
                order_id: order_id.to_string(),
            }
            .into());
        }
        tracing::debug!(%order_id, "Paper order cancelled");
        Ok(())
    }

    async fn detect_margin_type(&self, symbol: &str) -> anyhow::Result<MarginType> {
        let state = self.state.read().await;
        Ok(state
            .margin_types
            .get(&exchange_symbol(symbol))
            .copied()
            .unwrap_or(MarginType::Cross))
    }
}
