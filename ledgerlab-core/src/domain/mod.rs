//! Domain types for LedgerLab

pub mod bar;
pub mod instrument;
pub mod position;
pub mod timeline;
pub mod trade;

pub use bar::{MarketData, PriceField};
pub use instrument::{Instrument, InstrumentId};
pub use position::{InventoryEntry, PendingMarker, PositionState};
pub use timeline::{Timeline, TimelineEvent, TimelineKind};
pub use trade::HistoryRecord;
