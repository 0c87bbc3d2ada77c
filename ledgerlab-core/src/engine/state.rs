//! Simulation options and their validation.

use crate::domain::PriceField;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::transaction::{Transaction, DEFAULT_FEE_FLOOR, DEFAULT_FEE_REBATE};

pub const DEFAULT_STARTING_CAPITAL: i64 = 300_000;

/// Construction-time configuration errors. Raised before any date is processed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("starting capital must be non-negative, got {0}")]
    NegativeCapital(i64),
    #[error("fee rebate must be a non-negative finite number, got {0}")]
    InvalidFeeRebate(f64),
    #[error("fee floor must be a non-negative finite number, got {0}")]
    InvalidFeeFloor(f64),
    #[error("lot size must be positive")]
    ZeroLotSize,
    #[error("price band bound must be a non-negative finite number, got {0}")]
    InvalidPriceBound(f64),
    #[error("price band is inverted: low {low} > high {high}")]
    InvertedPriceBand { low: f64, high: f64 },
    #[error("stop loss must be a fraction in [0, 1), got {0}")]
    InvalidStopLoss(f64),
    #[error("date list is empty")]
    EmptyDates,
    #[error("date list is not strictly increasing at {0}")]
    UnorderedDates(NaiveDate),
}

/// Inclusive band on the returned low price that a buy must fall within.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

impl PriceBand {
    pub fn new(low: Option<f64>, high: Option<f64>) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, price: f64) -> bool {
        self.low.map_or(true, |low| price >= low) && self.high.map_or(true, |high| price <= high)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for bound in [self.low, self.high].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(ConfigError::InvalidPriceBound(bound));
            }
        }
        if let (Some(low), Some(high)) = (self.low, self.high) {
            if low > high {
                return Err(ConfigError::InvertedPriceBand { low, high });
            }
        }
        Ok(())
    }
}

/// Options for one simulation run.
///
/// Every field has a default, so a TOML `[options]` table may list only the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub starting_capital: i64,
    pub price_band: PriceBand,
    /// Stop-loss as a fraction of the buy price (0.1 = 10%).
    pub stop_loss: Option<f64>,
    pub buy_price_field: PriceField,
    pub sell_price_field: PriceField,
    pub fee_rebate: f64,
    pub fee_floor: f64,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            starting_capital: DEFAULT_STARTING_CAPITAL,
            price_band: PriceBand::default(),
            stop_loss: None,
            buy_price_field: PriceField::Open,
            sell_price_field: PriceField::Low,
            fee_rebate: DEFAULT_FEE_REBATE,
            fee_floor: DEFAULT_FEE_FLOOR,
        }
    }
}

impl ContextOptions {
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.fee_rebate, self.fee_floor)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.starting_capital < 0 {
            return Err(ConfigError::NegativeCapital(self.starting_capital));
        }
        self.transaction().validate()?;
        self.price_band.validate()?;
        if let Some(loss) = self.stop_loss {
            if !loss.is_finite() || !(0.0..1.0).contains(&loss) {
                return Err(ConfigError::InvalidStopLoss(loss));
            }
        }
        Ok(())
    }
}
