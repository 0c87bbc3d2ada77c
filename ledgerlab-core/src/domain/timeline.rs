//! Timeline — append-only audit log of ledger transitions, grouped by date.

use super::bar::MarketData;
use super::instrument::InstrumentId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineKind {
    Buy,
    Sell,
    WaitBuy,
    WaitSell,
}

impl fmt::Display for TimelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimelineKind::Buy => "BUY",
            TimelineKind::Sell => "SELL",
            TimelineKind::WaitBuy => "WAIT_BUY",
            TimelineKind::WaitSell => "WAIT_SELL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: NaiveDate,
    pub kind: TimelineKind,
    pub instrument_id: InstrumentId,
    pub name: String,
    pub data: MarketData,
}

/// Events keyed by date, in insertion order within a date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: BTreeMap<NaiveDate, Vec<TimelineEvent>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TimelineEvent) {
        self.events.entry(event.date).or_default().push(event);
    }

    pub fn on(&self, date: NaiveDate) -> &[TimelineEvent] {
        self.events.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All events in date order.
    pub fn iter(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events.values().flatten()
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.events.keys()
    }

    pub fn count(&self, kind: TimelineKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
