//! Binance USDⓈ-M futures REST gateway
//!
//! Signed requests use HMAC-SHA256 over the query string, with the
//! timestamp and receive window appended before signing.

use super::{
    exchange_symbol, AccountInfo, ExchangeGateway, ExchangePosition, Fill, GatewayError,
    MarginType, OrderId, OrderSide, PriceFeed,
};
use crate::config::ExchangeConfig;
use crate::stoploss::PositionSide;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Quantity precision sent with orders
const QUANTITY_DP: u32 = 3;
/// Price precision sent with stop orders
const PRICE_DP: u32 = 2;
/// "Unknown order sent." on cancel
const UNKNOWN_ORDER_CODE: i64 = -2011;

/// Configuration for the Binance gateway
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub recv_window_ms: u64,
    /// Request timeout
    pub timeout: Duration,
}

impl BinanceConfig {
    /// Build from the exchange section; credentials are required
    pub fn from_exchange(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("exchange.api_key is not set"))?;
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("exchange.secret_key is not set"))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            recv_window_ms: config.recv_window_ms,
            timeout: Duration::from_secs(10),
        })
    }

    /// Unauthenticated access for public market data only
    pub fn public(config: &ExchangeConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: String::new(),
            secret_key: String::new(),
            recv_window_ms: config.recv_window_ms,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    total_wallet_balance: Decimal,
    available_balance: Decimal,
    total_unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: Decimal,
    leverage: String,
    #[serde(default)]
    margin_type: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    avg_price: Decimal,
    #[serde(default)]
    executed_qty: Decimal,
}

/// Live gateway for Binance USDⓈ-M perpetual futures
pub struct BinanceFutures {
    config: BinanceConfig,
    client: Client,
}

impl BinanceFutures {
    /// Create a new gateway
    pub fn new(config: BinanceConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn sign(&self, query: &str) -> anyhow::Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid secret key: {}", e))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> anyhow::Result<String> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.config.recv_window_ms,
            Utc::now().timestamp_millis()
        ));
        let signature = self.sign(&query)?;
        query.push_str(&format!("&signature={}", signature));
        Ok(query)
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.config.base_url, path, query);

        tracing::debug!(%method, path, "Binance signed request");

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
        let status = response.status();
        let value: Value = response.json().await?;

        // Binance reports failures as {"code": -xxxx, "msg": "..."}
        if let Some(code) = value.get("code").and_then(Value::as_i64) {
            if code < 0 {
                let msg = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                return Err(GatewayError::Api {
                    code,
                    msg: msg.to_string(),
                }
                .into());
            }
        }
        if !status.is_success() {
            anyhow::bail!("Binance API error: {} - {}", status, value);
        }

        Ok(serde_json::from_value(value)?)
    }

    async fn position_risk(&self, symbol: &str) -> anyhow::Result<Vec<PositionRisk>> {
        self.signed(
            Method::GET,
            "/fapi/v2/positionRisk",
            &[("symbol", exchange_symbol(symbol))],
        )
        .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()> {
        let _: Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[
                    ("symbol", exchange_symbol(symbol)),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> anyhow::Result<Fill> {
        let quantity = quantity.round_dp(QUANTITY_DP);
        if quantity.is_zero() {
            anyhow::bail!("Order quantity rounds to zero");
        }

        let mut params = vec![
            ("symbol", exchange_symbol(symbol)),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let response: OrderResponse = self
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await?;

        let price = if response.avg_price.is_zero() {
            self.current_price(symbol).await?
        } else {
            response.avg_price
        };
        let filled = if response.executed_qty.is_zero() {
            quantity
        } else {
            response.executed_qty
        };

        Ok(Fill {
            order_id: response.order_id.to_string(),
            symbol: exchange_symbol(symbol),
            side,
            price,
            quantity: filled,
            fees: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl PriceFeed for BinanceFutures {
    async fn price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.current_price(symbol).await
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFutures {
    async fn get_account_info(&self) -> anyhow::Result<AccountInfo> {
        let account: AccountResponse = self.signed(Method::GET, "/fapi/v2/account", &[]).await?;
        Ok(AccountInfo {
            total_balance: account.total_wallet_balance + account.total_unrealized_profit,
            available_balance: account.available_balance,
            unrealized_pnl: account.total_unrealized_profit,
        })
    }

    async fn get_current_position(&self, symbol: &str) -> anyhow::Result<Option<ExchangePosition>> {
        let positions = self.position_risk(symbol).await?;
        Ok(positions
            .into_iter()
            .find(|p| !p.position_amt.is_zero())
            .map(|p| ExchangePosition {
                side: if p.position_amt > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                quantity: p.position_amt.abs(),
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_profit,
                leverage: p.leverage.parse().unwrap_or(1),
                symbol: p.symbol,
            }))
    }

    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let ticker: TickerPrice = self
            .public("/fapi/v1/ticker/price", &[("symbol", exchange_symbol(symbol))])
            .await?;
        Ok(ticker.price)
    }

    async fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        leverage: u32,
    ) -> anyhow::Result<Fill> {
        self.set_leverage(symbol, leverage).await?;
        let fill = self
            .market_order(symbol, OrderSide::opening(side), quantity, false)
            .await?;
        tracing::info!(order_id = %fill.order_id, %symbol, %side, price = %fill.price, "Binance order filled");
        Ok(fill)
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
    ) -> anyhow::Result<Fill> {
        let fill = self
            .market_order(symbol, OrderSide::closing(side), quantity, true)
            .await?;
        tracing::info!(order_id = %fill.order_id, %symbol, %side, price = %fill.price, "Binance position closed");
        Ok(fill)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> anyhow::Result<OrderId> {
        let params = [
            ("symbol", exchange_symbol(symbol)),
            ("side", OrderSide::closing(side).as_str().to_string()),
            ("type", "STOP_MARKET".to_string()),
            ("stopPrice", stop_price.round_dp(PRICE_DP).normalize().to_string()),
            (
                "quantity",
                quantity.round_dp(QUANTITY_DP).normalize().to_string(),
            ),
            ("reduceOnly", "true".to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ];
        let response: OrderResponse = self
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await?;
        Ok(response.order_id.to_string())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> anyhow::Result<()> {
        let cancelled: anyhow::Result<Value> = self
            .signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[
                    ("symbol", exchange_symbol(symbol)),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await;
        match cancelled {
            Ok(_) => Ok(()),
            Err(e) => match e.downcast_ref::<GatewayError>() {
                Some(GatewayError::Api { code, .. }) if *code == UNKNOWN_ORDER_CODE => {
                    Err(GatewayError::UnknownOrder {
                        symbol: exchange_symbol(symbol),
                        order_id: order_id.to_string(),
                    }
                    .into())
                }
                _ => Err(e),
            },
        }
    }

    async fn detect_margin_type(&self, symbol: &str) -> anyhow::Result<MarginType> {
        let positions = self.position_risk(symbol).await?;
        let margin_type = positions
            .first()
            .map(|p| p.margin_type.to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("No position risk entry for {}", symbol))?;
        match margin_type.as_str() {
            "isolated" => Ok(MarginType::Isolated),
            "cross" | "crossed" => Ok(MarginType::Cross),
            other => anyhow::bail!("Unknown margin type '{}'", other),
        }
    }
}
