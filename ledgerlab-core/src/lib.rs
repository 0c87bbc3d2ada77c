//! LedgerLab Core — dates, decisions, ledger and the simulation context.
//!
//! This crate contains the heart of the backtesting engine:
//! - Domain types (market data, instruments, positions, trade history, timeline)
//! - Date sequence with synchronous observer notification
//! - Transaction calculator (broker fee, fee floor, transaction tax)
//! - Ledger store with one tagged state per instrument
//! - Simulation context running the two-phase buy/sell state machines

pub mod components;
pub mod domain;
pub mod engine;

pub use components::{decision_fn, Decision, DecisionError, DecisionList};
pub use domain::{Instrument, InstrumentId, MarketData, PriceField};
pub use engine::{Context, ContextOptions, DateSequence, Ledger, StepStatus, Transaction};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: values handed across sweep worker threads are
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::MarketData>();
        require_sync::<domain::MarketData>();
        require_send::<domain::Instrument>();
        require_sync::<domain::Instrument>();
        require_send::<domain::HistoryRecord>();
        require_sync::<domain::HistoryRecord>();
        require_send::<domain::Timeline>();
        require_sync::<domain::Timeline>();

        // Decisions are shared between contexts built on different threads
        require_send::<components::DecisionList>();
        require_sync::<components::DecisionList>();

        // Engine types
        require_send::<engine::ContextOptions>();
        require_sync::<engine::ContextOptions>();
        require_send::<engine::Transaction>();
        require_sync::<engine::Transaction>();
        require_send::<engine::Ledger>();
        require_sync::<engine::Ledger>();
        require_send::<engine::ConfigError>();
        require_sync::<engine::ConfigError>();
    }

    /// Architecture contract: a decision sees the instrument and the date, not
    /// the ledger or the capital account.
    #[test]
    fn decision_trait_has_no_ledger_parameter() {
        fn _check_trait_object_builds(
            decision: &dyn components::Decision,
            instrument: &domain::Instrument,
            date: chrono::NaiveDate,
        ) -> Result<Option<domain::MarketData>, components::DecisionError> {
            decision.evaluate(instrument, date, false)
        }
    }
}
