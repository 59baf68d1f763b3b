//! Risk management module
//!
//! Leverage policy, portfolio exposure limits and rebalancing hints

mod leverage;
mod portfolio;
mod types;

pub use leverage::{resolve, LeverageRange, MAX_LEVERAGE};
pub use portfolio::PortfolioRiskManager;
pub use types::{ConcentrationWarning, ExposureSnapshot, RiskError};
