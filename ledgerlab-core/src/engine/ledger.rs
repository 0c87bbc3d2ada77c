//! Ledger store — positions, pending markers, closed trades and the timeline.
//!
//! Each instrument is either absent (idle), pending purchase, or holding
//! (optionally with a pending sale). Every mutation checks its precondition
//! before touching any state, so a rejected call leaves the ledger unchanged.

use crate::domain::{
    HistoryRecord, Instrument, InstrumentId, InventoryEntry, MarketData, PendingMarker,
    PositionState, Timeline, TimelineEvent, TimelineKind,
};
use chrono::NaiveDate;
use log::debug;
use std::collections::BTreeMap;
use thiserror::Error;

/// Ledger precondition violations.
///
/// Under correct state-machine sequencing none of these occur; they signal a
/// bug in the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("instrument {0} is not in inventory")]
    NotHeld(InstrumentId),
    #[error("instrument {0} is already in inventory")]
    AlreadyHeld(InstrumentId),
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    positions: BTreeMap<InstrumentId, PositionState>,
    history: Vec<HistoryRecord>,
    win: u32,
    lose: u32,
    profit: i64,
    timeline: Timeline,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──

    pub fn is_in_inventory(&self, id: &InstrumentId) -> bool {
        self.inventory_entry(id).is_some()
    }

    pub fn is_pending_purchase(&self, id: &InstrumentId) -> bool {
        self.pending_purchase(id).is_some()
    }

    pub fn is_pending_sale(&self, id: &InstrumentId) -> bool {
        self.pending_sale(id).is_some()
    }

    pub fn inventory_entry(&self, id: &InstrumentId) -> Option<&InventoryEntry> {
        self.positions.get(id).and_then(PositionState::entry)
    }

    pub fn pending_purchase(&self, id: &InstrumentId) -> Option<&PendingMarker> {
        self.positions.get(id).and_then(PositionState::pending_purchase)
    }

    pub fn pending_sale(&self, id: &InstrumentId) -> Option<&PendingMarker> {
        self.positions.get(id).and_then(PositionState::pending_sale)
    }

    pub fn position(&self, id: &InstrumentId) -> Option<&PositionState> {
        self.positions.get(id)
    }

    /// Open inventory, ordered by instrument id.
    pub fn inventory(&self) -> impl Iterator<Item = &InventoryEntry> {
        self.positions.values().filter_map(PositionState::entry)
    }

    pub fn inventory_len(&self) -> usize {
        self.inventory().count()
    }

    pub fn pending_purchases(&self) -> impl Iterator<Item = (&InstrumentId, &PendingMarker)> {
        self.positions
            .iter()
            .filter_map(|(id, state)| state.pending_purchase().map(|m| (id, m)))
    }

    pub fn pending_sales(&self) -> impl Iterator<Item = (&InstrumentId, &PendingMarker)> {
        self.positions
            .iter()
            .filter_map(|(id, state)| state.pending_sale().map(|m| (id, m)))
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn win(&self) -> u32 {
        self.win
    }

    pub fn lose(&self) -> u32 {
        self.lose
    }

    /// Realised profit over all closed trades.
    pub fn profit(&self) -> i64 {
        self.profit
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    // ── Mutations ──

    /// Open a position. Replaces any pending-purchase marker; emits BUY.
    pub fn record_buy_fill(
        &mut self,
        instrument: &Instrument,
        data: MarketData,
        fill_price: i64,
        date: NaiveDate,
    ) -> Result<(), LedgerError> {
        if self.is_in_inventory(&instrument.id) {
            return Err(LedgerError::AlreadyHeld(instrument.id.clone()));
        }
        let entry = InventoryEntry {
            instrument_id: instrument.id.clone(),
            name: instrument.name.clone(),
            buy_data: data.clone(),
            buy_price: fill_price,
            buy_date: date,
        };
        self.positions.insert(
            instrument.id.clone(),
            PositionState::Holding {
                entry,
                pending_sale: None,
            },
        );
        self.push_event(instrument, TimelineKind::Buy, data, date);
        Ok(())
    }

    /// Close a position and book the trade. Emits SELL.
    pub fn record_sell_fill(
        &mut self,
        instrument: &Instrument,
        data: MarketData,
        fill_price: i64,
        date: NaiveDate,
    ) -> Result<&HistoryRecord, LedgerError> {
        let entry = match self.positions.remove(&instrument.id) {
            Some(PositionState::Holding { entry, .. }) => entry,
            other => {
                if let Some(state) = other {
                    self.positions.insert(instrument.id.clone(), state);
                }
                return Err(LedgerError::NotHeld(instrument.id.clone()));
            }
        };

        let record = HistoryRecord::close(entry, data.clone(), fill_price, date);
        let profit = record.profit();
        if profit > 0 {
            self.win += 1;
        } else {
            self.lose += 1;
        }
        self.profit += profit;
        debug!("{}: closed trade, profit {profit}", instrument.id);

        let index = self.history.len();
        self.history.push(record);
        self.push_event(instrument, TimelineKind::Sell, data, date);
        Ok(&self.history[index])
    }

    /// Remember that a buy condition triggered on `date`. Emits WAIT_BUY.
    pub fn mark_pending_purchase(
        &mut self,
        instrument: &Instrument,
        data: MarketData,
        date: NaiveDate,
    ) -> Result<(), LedgerError> {
        if self.is_in_inventory(&instrument.id) {
            return Err(LedgerError::AlreadyHeld(instrument.id.clone()));
        }
        let marker = PendingMarker {
            since: date,
            data: data.clone(),
        };
        self.positions
            .insert(instrument.id.clone(), PositionState::PendingPurchase(marker));
        self.push_event(instrument, TimelineKind::WaitBuy, data, date);
        Ok(())
    }

    /// Remember that a sell condition triggered on `date`. Emits WAIT_SELL.
    pub fn mark_pending_sale(
        &mut self,
        instrument: &Instrument,
        data: MarketData,
        date: NaiveDate,
    ) -> Result<(), LedgerError> {
        match self.positions.get_mut(&instrument.id) {
            Some(PositionState::Holding { pending_sale, .. }) => {
                *pending_sale = Some(PendingMarker {
                    since: date,
                    data: data.clone(),
                });
            }
            _ => return Err(LedgerError::NotHeld(instrument.id.clone())),
        }
        self.push_event(instrument, TimelineKind::WaitSell, data, date);
        Ok(())
    }

    /// Drop a pending-purchase marker without an event. No-op when absent.
    pub fn clear_pending_purchase(&mut self, id: &InstrumentId) {
        if self.is_pending_purchase(id) {
            self.positions.remove(id);
        }
    }

    /// Drop a pending-sale marker without an event. No-op when absent.
    pub fn clear_pending_sale(&mut self, id: &InstrumentId) {
        if let Some(PositionState::Holding { pending_sale, .. }) = self.positions.get_mut(id) {
            *pending_sale = None;
        }
    }

    /// Clear positions, markers, history and counters. The timeline is kept.
    pub fn reset(&mut self) {
        self.positions.clear();
        self.history.clear();
        self.win = 0;
        self.lose = 0;
        self.profit = 0;
    }

    fn push_event(
        &mut self,
        instrument: &Instrument,
        kind: TimelineKind,
        data: MarketData,
        date: NaiveDate,
    ) {
        self.timeline.push(TimelineEvent {
            date,
            kind,
            instrument_id: instrument.id.clone(),
            name: instrument.name.clone(),
            data,
        });
    }
}
