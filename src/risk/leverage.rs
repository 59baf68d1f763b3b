//! Leverage policy

use super::RiskError;
use serde::Serialize;

/// Highest leverage any configuration may request
pub const MAX_LEVERAGE: u32 = 125;

/// Clamp a requested leverage into the configured bounds
///
/// Fixed mode always yields `min`. Dynamic mode clamps `requested` into
/// `[min, max]`, with zero meaning "not stated" and falling back to `min`.
/// The result is never zero. Inverted bounds are rejected when a
/// [`LeverageRange`] is built; here they resolve to `max` instead of panicking.
pub fn resolve(requested: u32, min: u32, max: u32, dynamic: bool) -> u32 {
    let leverage = if !dynamic || requested == 0 {
        min
    } else {
        requested.max(min).min(max)
    };
    leverage.max(1)
}

/// Configured leverage bounds: `"10"` is fixed, `"10-20"` is dynamic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeverageRange {
    min: u32,
    max: u32,
}

impl LeverageRange {
    pub fn new(min: u32, max: u32) -> Result<Self, RiskError> {
        if min == 0 {
            return Err(RiskError::InvalidLeverageRange(
                "leverage must be at least 1".to_string(),
            ));
        }
        if min > max {
            return Err(RiskError::InvalidLeverageRange(format!(
                "min {} greater than max {}",
                min, max
            )));
        }
        if max > MAX_LEVERAGE {
            return Err(RiskError::InvalidLeverageRange(format!(
                "max {} above {}",
                max, MAX_LEVERAGE
            )));
        }
        Ok(Self { min, max })
    }

    pub fn fixed(leverage: u32) -> Result<Self, RiskError> {
        Self::new(leverage, leverage)
    }

    /// Parse `"N"` or `"MIN-MAX"`
    pub fn parse(value: &str) -> Result<Self, RiskError> {
        let number = |s: &str| {
            s.trim().parse::<u32>().map_err(|_| {
                RiskError::InvalidLeverageRange(format!("'{}' is not a leverage", s.trim()))
            })
        };
        match value.split_once('-') {
            Some((min, max)) => Self::new(number(min)?, number(max)?),
            None => Self::fixed(number(value)?),
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_dynamic(&self) -> bool {
        self.min != self.max
    }

    pub fn resolve(&self, requested: u32) -> u32 {
        resolve(requested, self.min, self.max, self.is_dynamic())
    }
}
