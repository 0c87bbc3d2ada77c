//! LedgerLab Runner: backtest orchestration on top of `ledgerlab-core`.
//!
//! This crate provides:
//! - TOML backtest configs with built-in rule decisions
//! - Bar loading from CSV with a deterministic synthetic fallback
//! - Single-backtest runner with equity curve, metrics and run fingerprint
//! - Option sweeps, sequential or rayon-parallel

pub mod config;
pub mod data_loader;
pub mod metrics;
pub mod rules;
pub mod runner;
pub mod sweep;

pub use config::{BacktestConfig, ConfigError, RuleConfig};
pub use data_loader::{load_bars, BarSeries, BarTable, LoadError, LoadOptions, LoadedData};
pub use metrics::PerformanceMetrics;
pub use rules::{build_decisions, RuleDecision};
pub use runner::{
    build_context, execute, run_backtest_from_data, run_single_backtest, BacktestResult, RunError,
};
pub use sweep::{ParamSweep, SweepGrid, SweepResults};
