//! Backtesting engine — date-driven simulation over a set of instruments.
//!
//! A [`DateSequence`] moves time forward one date at a time. On every date the
//! [`Context`] runs the buy machine, then the sell machine, for each tracked
//! instrument, pricing fills with the [`Transaction`] calculator and recording
//! them in the [`Ledger`].

pub mod context;
pub mod date_sequence;
pub mod ledger;
pub mod state;
pub mod transaction;

pub use context::{Context, InstrumentFailure, StepError, StepStatus};
pub use date_sequence::{Advance, DateObserver, DateSequence, ObserverError, ObserverFailure};
pub use ledger::{Ledger, LedgerError};
pub use state::{ConfigError, ContextOptions, PriceBand, DEFAULT_STARTING_CAPITAL};
pub use transaction::{
    Transaction, DEFAULT_FEE_FLOOR, DEFAULT_FEE_REBATE, HANDLING_FEE_RATE, LOT_SIZE,
    TRANSACTION_TAX_RATE,
};
