//! Configuration types for perp-guard

use crate::risk::LeverageRange;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub stoploss: StopLossConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Leverage string did not describe a usable range
    #[error("Invalid leverage setting '{value}': {reason}")]
    InvalidLeverage { value: String, reason: String },
    /// No symbols configured
    #[error("No trading symbols configured")]
    NoSymbols,
    /// Symbol not in BASE/QUOTE form
    #[error("Unsupported symbol '{0}', expected BASE/QUOTE")]
    InvalidSymbol(String),
    /// Percentage or ratio outside its allowed range
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: Decimal },
    /// Live mode requires API credentials
    #[error("Live mode requires exchange.api_key and exchange.secret_key")]
    MissingCredentials,
}

/// Exchange connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub mode: ExecutionMode,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    /// REST endpoint for the live gateway
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,

    /// Starting wallet balance for the paper gateway (USDT)
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,

    /// Taker fee charged by the paper gateway
    #[serde(default = "default_paper_fee_rate")]
    pub paper_fee_rate: Decimal,
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

fn default_base_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_recv_window_ms() -> u64 {
    5000
}
fn default_paper_balance() -> Decimal {
    Decimal::new(10000, 0)
}
fn default_paper_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.04%
}

/// Trading loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols in BASE/QUOTE form
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Either a fixed leverage ("10") or a dynamic range ("10-20")
    #[serde(default = "default_leverage")]
    pub leverage: String,

    /// Position size in percent of the symbol allocation when the decision gives none
    #[serde(default = "default_position_pct")]
    pub default_position_pct: Decimal,

    /// Seconds between trading cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// File the decision text is read from each cycle
    #[serde(default = "default_decision_file")]
    pub decision_file: PathBuf,
}

fn default_symbols() -> Vec<String> {
    vec!["BTC/USDT".to_string()]
}
fn default_leverage() -> String {
    "10".to_string()
}
fn default_position_pct() -> Decimal {
    Decimal::new(10, 0)
}
fn default_interval_secs() -> u64 {
    900 // 15 minutes
}
fn default_decision_file() -> PathBuf {
    PathBuf::from("decision.txt")
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            leverage: default_leverage(),
            default_position_pct: default_position_pct(),
            interval_secs: default_interval_secs(),
            decision_file: default_decision_file(),
        }
    }
}

/// Portfolio risk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of total balance that may be committed across all positions
    #[serde(default = "default_max_total_risk")]
    pub max_total_risk: Decimal,

    /// Share of aggregate exposure above which a symbol is flagged as concentrated
    #[serde(default = "default_concentration_threshold")]
    pub concentration_threshold: Decimal,

    /// Minimum available balance (USDT) required to open positions
    #[serde(default = "default_min_balance")]
    pub min_balance: Decimal,
}

fn default_max_total_risk() -> Decimal {
    Decimal::new(30, 2) // 0.30
}
fn default_concentration_threshold() -> Decimal {
    Decimal::new(50, 2) // 0.50
}
fn default_min_balance() -> Decimal {
    Decimal::new(10, 0)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_risk: default_max_total_risk(),
            concentration_threshold: default_concentration_threshold(),
            min_balance: default_min_balance(),
        }
    }
}

/// Stop-loss management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// Adverse move from entry used when a decision carries no stop
    #[serde(default = "default_stop_pct")]
    pub default_stop_pct: Decimal,

    /// Trailing distance as a fraction of the high-water mark
    #[serde(default = "default_trailing_distance")]
    pub trailing_distance: Decimal,

    /// Stop changes smaller than this fraction of the current stop are skipped
    #[serde(default)]
    pub min_change_pct: Decimal,

    /// Enable the local polling monitor
    #[serde(default)]
    pub monitor_enabled: bool,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

fn default_stop_pct() -> Decimal {
    Decimal::new(25, 3) // 0.025 = 2.5%
}
fn default_trailing_distance() -> Decimal {
    Decimal::new(3, 2) // 0.03 = 3%
}
fn default_monitor_interval_secs() -> u64 {
    60
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            default_stop_pct: default_stop_pct(),
            trailing_distance: default_trailing_distance(),
            min_change_pct: Decimal::ZERO,
            monitor_enabled: false,
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document path; in-memory storage when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Balance snapshots and trading sessions kept, oldest dropped first
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_snapshot_interval_secs() -> u64 {
    300 // 5 minutes
}
pub(crate) fn default_history_limit() -> usize {
    2_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            snapshot_interval_secs: default_snapshot_interval_secs(),
            history_limit: default_history_limit(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port; exporter disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parsed leverage policy bounds
    pub fn leverage_range(&self) -> Result<LeverageRange, ConfigError> {
        LeverageRange::parse(&self.trading.leverage).map_err(|e| ConfigError::InvalidLeverage {
            value: self.trading.leverage.clone(),
            reason: e.to_string(),
        })
    }

    /// Check everything that must hold before the trading loop starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.leverage_range()?;

        if self.trading.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        for symbol in &self.trading.symbols {
            let mut parts = symbol.split('/');
            let valid = matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(base), Some(quote), None) if !base.trim().is_empty() && !quote.trim().is_empty()
            );
            if !valid {
                return Err(ConfigError::InvalidSymbol(symbol.clone()));
            }
        }

        let pct = self.trading.default_position_pct;
        if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(ConfigError::InvalidValue {
                field: "trading.default_position_pct",
                value: pct,
            });
        }
        check_fraction("risk.max_total_risk", self.risk.max_total_risk)?;
        check_fraction(
            "risk.concentration_threshold",
            self.risk.concentration_threshold,
        )?;
        check_fraction("stoploss.default_stop_pct", self.stoploss.default_stop_pct)?;
        check_fraction(
            "stoploss.trailing_distance",
            self.stoploss.trailing_distance,
        )?;
        if self.stoploss.min_change_pct < Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "stoploss.min_change_pct",
                value: self.stoploss.min_change_pct,
            });
        }

        if self.storage.history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.history_limit",
                value: Decimal::ZERO,
            });
        }

        if self.exchange.mode == ExecutionMode::Live
            && (self.exchange.api_key.is_none() || self.exchange.secret_key.is_none())
        {
            return Err(ConfigError::MissingCredentials);
        }

        Ok(())
    }
}

fn check_fraction(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        return Err(ConfigError::InvalidValue { field, value });
    }
    Ok(())
}
