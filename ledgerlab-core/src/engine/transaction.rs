//! Transaction calculator — fill cost and proceeds for one lot.
//!
//! Broker fee is 0.1425% of notional, discounted by the rebate, with a flat
//! minimum. Sells additionally pay 0.3% transaction tax on the fee-inclusive
//! amount. Rounding happens once, at the end, to the nearest currency unit.

use serde::{Deserialize, Serialize};

use super::state::ConfigError;

/// Broker fee rate before rebate.
pub const HANDLING_FEE_RATE: f64 = 0.001425;
/// Securities transaction tax charged on sells.
pub const TRANSACTION_TAX_RATE: f64 = 0.003;
/// Shares per board lot.
pub const LOT_SIZE: u32 = 1000;

pub const DEFAULT_FEE_REBATE: f64 = 0.65;
pub const DEFAULT_FEE_FLOOR: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Fraction of the broker fee actually charged (0.65 = 35% rebate).
    pub fee_rebate: f64,
    /// Minimum broker fee per fill, in currency units.
    pub fee_floor: f64,
    pub lot_size: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            fee_rebate: DEFAULT_FEE_REBATE,
            fee_floor: DEFAULT_FEE_FLOOR,
            lot_size: LOT_SIZE,
        }
    }
}

impl Transaction {
    pub fn new(fee_rebate: f64, fee_floor: f64) -> Self {
        Self {
            fee_rebate,
            fee_floor,
            lot_size: LOT_SIZE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fee_rebate.is_finite() || self.fee_rebate < 0.0 {
            return Err(ConfigError::InvalidFeeRebate(self.fee_rebate));
        }
        if !self.fee_floor.is_finite() || self.fee_floor < 0.0 {
            return Err(ConfigError::InvalidFeeFloor(self.fee_floor));
        }
        if self.lot_size == 0 {
            return Err(ConfigError::ZeroLotSize);
        }
        Ok(())
    }

    /// Notional value of one lot at `unit_price`.
    pub fn notional(&self, unit_price: f64) -> f64 {
        unit_price * f64::from(self.lot_size)
    }

    /// Total cost of buying one lot at `unit_price`.
    pub fn buy_fill(&self, unit_price: f64) -> i64 {
        self.buy_fill_for(unit_price, self.lot_size)
    }

    /// Total amount booked for selling one lot at `unit_price`.
    pub fn sell_fill(&self, unit_price: f64) -> i64 {
        self.sell_fill_for(unit_price, self.lot_size)
    }

    pub fn buy_fill_for(&self, unit_price: f64, lot_size: u32) -> i64 {
        round_currency(self.with_fee(unit_price * f64::from(lot_size)))
    }

    pub fn sell_fill_for(&self, unit_price: f64, lot_size: u32) -> i64 {
        let amount = self.with_fee(unit_price * f64::from(lot_size));
        round_currency(amount + amount * TRANSACTION_TAX_RATE)
    }

    /// Broker fee on `base`, floored at `fee_floor`.
    pub fn handling_fee(&self, base: f64) -> f64 {
        let fee = base * HANDLING_FEE_RATE * self.fee_rebate;
        if fee < self.fee_floor {
            self.fee_floor
        } else {
            fee
        }
    }

    fn with_fee(&self, base: f64) -> f64 {
        base + self.handling_fee(base)
    }
}

fn round_currency(amount: f64) -> i64 {
    amount.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let tx = Transaction::default();
        assert_eq!(tx.fee_rebate, 0.65);
        assert_eq!(tx.fee_floor, 20.0);
        assert_eq!(tx.lot_size, 1000);
    }

    #[test]
    fn buy_below_fee_floor_pays_floor() {
        // 10_000 + 20 (floor)
        assert_eq!(Transaction::default().buy_fill(10.0), 10_020);
    }

    #[test]
    fn buy_above_fee_floor_pays_fee() {
        // 100_000 + 92.625
        assert_eq!(Transaction::default().buy_fill(100.0), 100_093);
    }

    #[test]
    fn sell_below_fee_floor_adds_tax() {
        // (10_000 + 20) * 1.003
        assert_eq!(Transaction::default().sell_fill(10.0), 10_050);
    }

    #[test]
    fn sell_above_fee_floor_adds_tax() {
        // (100_000 + 92.625) * 1.003
        assert_eq!(Transaction::default().sell_fill(100.0), 100_393);
    }

    #[test]
    fn custom_floor_is_used() {
        let tx = Transaction::new(0.5, 30.0);
        assert_eq!(tx.buy_fill(10.0), 10_030);
        assert_eq!(tx.handling_fee(10_000.0), 30.0);
    }

    #[test]
    fn explicit_lot_size() {
        let tx = Transaction::default();
        // 100 * 2000 = 200_000, fee 185.25
        assert_eq!(tx.buy_fill_for(100.0, 2000), 200_185);
    }

    #[test]
    fn validate_rejects_negative_and_nan() {
        assert!(Transaction::default().validate().is_ok());
        assert!(matches!(
            Transaction::new(-0.1, 20.0).validate(),
            Err(ConfigError::InvalidFeeRebate(_))
        ));
        assert!(matches!(
            Transaction::new(0.65, f64::NAN).validate(),
            Err(ConfigError::InvalidFeeFloor(_))
        ));
        let mut tx = Transaction::default();
        tx.lot_size = 0;
        assert!(matches!(tx.validate(), Err(ConfigError::ZeroLotSize)));
    }
}
