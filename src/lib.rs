//! perp-guard: position and risk lifecycle engine for leveraged futures trading
//!
//! This library provides the core components for:
//! - Parsing free-text, multi-symbol trade decisions
//! - Leverage policy and portfolio exposure limits
//! - A stop-loss state machine per open position, with trailing updates
//! - Trade coordination with per-symbol batch isolation
//! - Paper and Binance USDⓈ-M execution gateways
//! - JSON-file persistence for restart recovery
//! - Structured logging and Prometheus metrics

pub mod cli;
pub mod config;
pub mod decision;
pub mod engine;
pub mod execution;
pub mod risk;
pub mod stoploss;
pub mod storage;
pub mod telemetry;
