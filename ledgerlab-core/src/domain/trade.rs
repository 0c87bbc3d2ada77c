//! HistoryRecord — a closed round-trip trade.

use super::bar::MarketData;
use super::instrument::InstrumentId;
use super::position::InventoryEntry;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A complete round trip: the inventory entry plus the sell side.
///
/// Appended to the ledger history on sell fill and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    // ── Identification ──
    pub instrument_id: InstrumentId,
    pub name: String,

    // ── Entry ──
    pub buy_data: MarketData,
    pub buy_price: i64,
    pub buy_date: NaiveDate,

    // ── Exit ──
    pub sell_data: MarketData,
    pub sell_price: i64,
    pub sell_date: NaiveDate,
}

impl HistoryRecord {
    pub fn close(
        entry: InventoryEntry,
        sell_data: MarketData,
        sell_price: i64,
        sell_date: NaiveDate,
    ) -> Self {
        Self {
            instrument_id: entry.instrument_id,
            name: entry.name,
            buy_data: entry.buy_data,
            buy_price: entry.buy_price,
            buy_date: entry.buy_date,
            sell_data,
            sell_price,
            sell_date,
        }
    }

    /// Realised profit in currency units (sell proceeds minus buy cost).
    pub fn profit(&self) -> i64 {
        self.sell_price - self.buy_price
    }

    /// Profit as a fraction of the buy cost.
    pub fn return_pct(&self) -> f64 {
        if self.buy_price == 0 {
            return 0.0;
        }
        self.profit() as f64 / self.buy_price as f64
    }

    pub fn is_winner(&self) -> bool {
        self.profit() > 0
    }

    /// Calendar days between buy and sell.
    pub fn days_held(&self) -> i64 {
        (self.sell_date - self.buy_date).num_days()
    }
}
