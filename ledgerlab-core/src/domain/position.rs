//! Open positions and pending markers held by the ledger.

use super::bar::MarketData;
use super::instrument::InstrumentId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One open lot of an instrument, from buy fill until sell fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub instrument_id: InstrumentId,
    pub name: String,
    pub buy_data: MarketData,
    /// Total cost of the fill in integer currency units (fees included).
    pub buy_price: i64,
    pub buy_date: NaiveDate,
}

/// A buy or sell condition that matched but has not been filled yet.
///
/// `since` is the date the condition first triggered; the buy side uses it
/// to expire stale markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub since: NaiveDate,
    pub data: MarketData,
}

/// Ledger-side state of one instrument.
///
/// Holding and pending-purchase are mutually exclusive, and a pending sale
/// can only exist while holding.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    PendingPurchase(PendingMarker),
    Holding {
        entry: InventoryEntry,
        pending_sale: Option<PendingMarker>,
    },
}

impl PositionState {
    pub fn entry(&self) -> Option<&InventoryEntry> {
        match self {
            PositionState::Holding { entry, .. } => Some(entry),
            PositionState::PendingPurchase(_) => None,
        }
    }

    pub fn pending_purchase(&self) -> Option<&PendingMarker> {
        match self {
            PositionState::PendingPurchase(marker) => Some(marker),
            PositionState::Holding { .. } => None,
        }
    }

    pub fn pending_sale(&self) -> Option<&PendingMarker> {
        match self {
            PositionState::Holding { pending_sale, .. } => pending_sale.as_ref(),
            PositionState::PendingPurchase(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> PendingMarker {
        let date = NaiveDate::from_ymd_opt(2020, 7, 29).unwrap();
        PendingMarker {
            since: date,
            data: MarketData::new(date, 10.0, 11.0, 9.5, 10.5),
        }
    }

    #[test]
    fn pending_purchase_has_no_entry() {
        let state = PositionState::PendingPurchase(marker());
        assert!(state.entry().is_none());
        assert!(state.pending_sale().is_none());
        assert_eq!(state.pending_purchase(), Some(&marker()));
    }

    #[test]
    fn holding_exposes_entry_and_sale_marker() {
        let m = marker();
        let state = PositionState::Holding {
            entry: InventoryEntry {
                instrument_id: InstrumentId::new("2330"),
                name: "TSMC".into(),
                buy_data: m.data.clone(),
                buy_price: 10_020,
                buy_date: m.since,
            },
            pending_sale: Some(m.clone()),
        };
        assert_eq!(state.entry().map(|e| e.buy_price), Some(10_020));
        assert!(state.pending_purchase().is_none());
        assert_eq!(state.pending_sale(), Some(&m));
    }
}
