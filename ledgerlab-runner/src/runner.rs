//! Backtest runner: wires config, bar data, rule decisions and the context.
//!
//! Two entry points:
//! - `run_single_backtest()`: loads bars from `data_dir` (or generates them),
//!   then runs. Used by the CLI.
//! - `run_backtest_from_data()`: takes pre-loaded bars. Used by sweeps and
//!   tests.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerlab_core::domain::{HistoryRecord, InstrumentId, InventoryEntry, Timeline};
use ledgerlab_core::engine::{
    self, Context, ContextOptions, DateObserver, ObserverError, StepStatus,
};

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{load_bars, BarTable, LoadError, LoadOptions, LoadedData};
use crate::metrics::PerformanceMetrics;
use crate::rules::build_decisions;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] engine::ConfigError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    /// Hash of the config, the options actually used, and the dataset.
    pub run_id: RunId,
    pub options: ContextOptions,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<HistoryRecord>,
    pub open_positions: Vec<InventoryEntry>,
    /// Equity (capital plus open positions at their latest close) per date.
    pub equity_curve: Vec<f64>,
    pub timeline: Timeline,
    pub starting_capital: i64,
    pub final_capital: i64,
    pub final_equity: i64,
    pub unrealized_profit: i64,
    pub realized_profit: i64,
    pub win: u32,
    pub lose: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub date_count: usize,
    pub dataset_hash: String,
    pub has_synthetic: bool,
    /// Per-instrument failures contained during the run, rendered for display.
    pub failures: Vec<String>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn is_profitable(&self) -> bool {
        self.final_equity > self.starting_capital
    }
}

/// Run a single backtest from a BacktestConfig.
///
/// Bars are read from `<data_dir>/<id>.csv`; with `synthetic` set, missing
/// files are replaced by generated bars and the result is flagged.
pub fn run_single_backtest(
    config: &BacktestConfig,
    synthetic: bool,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let opts = LoadOptions {
        start: config.backtest.start_date,
        end: config.backtest.end_date,
        synthetic,
    };
    let loaded = load_bars(&config.instruments(), &config.backtest.data_dir, &opts)?;
    run_backtest_from_data(config, &loaded)
}

/// Run a backtest over bars that are already loaded.
pub fn run_backtest_from_data(
    config: &BacktestConfig,
    loaded: &LoadedData,
) -> Result<BacktestResult, RunError> {
    let mut ctx = build_context(config, loaded, config.options.clone())?;
    ctx.attach_observer(Box::new(ProgressLog::default()));
    Ok(execute(&mut ctx, config, loaded))
}

/// Build a fresh context for `config` over `loaded` with the given options.
pub fn build_context(
    config: &BacktestConfig,
    loaded: &LoadedData,
    options: ContextOptions,
) -> Result<Context, RunError> {
    let buy = build_decisions(&config.buy, &loaded.table);
    let sell = build_decisions(&config.sell, &loaded.table);
    let ctx = Context::new(loaded.dates.clone(), config.instruments(), buy, sell, options)?;
    Ok(ctx)
}

/// Drive `ctx` to exhaustion from its current position and summarise.
///
/// The context must be freshly built or reset.
pub fn execute(
    ctx: &mut Context,
    config: &BacktestConfig,
    loaded: &LoadedData,
) -> BacktestResult {
    let mut equity_curve = Vec::with_capacity(loaded.dates.len());
    let mut marks: HashMap<InstrumentId, f64> = HashMap::new();
    let mut timeline = Timeline::new();
    // the ledger timeline survives resets; only this run's events are reported
    let carried: HashMap<NaiveDate, usize> = {
        let previous = ctx.ledger().timeline();
        previous.dates().map(|d| (*d, previous.on(*d).len())).collect()
    };

    while let StepStatus::Continue(date) = ctx.step() {
        update_marks(&mut marks, ctx, &loaded.table, date);
        equity_curve.push(ctx.equity(&marks) as f64);
        let skip = carried.get(&date).copied().unwrap_or(0);
        for event in ctx.ledger().timeline().on(date).iter().skip(skip) {
            timeline.push(event.clone());
        }
        for failure in ctx.last_observer_failures() {
            warn!(
                "observer {} failed on {}: {}",
                failure.observer, failure.date, failure.error
            );
        }
    }

    summarize(ctx, config, loaded, equity_curve, timeline, &marks)
}

/// Refresh the latest close for every held instrument. Instruments without a
/// bar on `date` keep their last known close.
fn update_marks(
    marks: &mut HashMap<InstrumentId, f64>,
    ctx: &Context,
    table: &BarTable,
    date: NaiveDate,
) {
    for entry in ctx.ledger().inventory() {
        let close = table
            .series(&entry.instrument_id)
            .and_then(|s| s.last_on_or_before(date))
            .map(|bar| bar.close);
        if let Some(close) = close {
            marks.insert(entry.instrument_id.clone(), close);
        }
    }
}

fn summarize(
    ctx: &Context,
    config: &BacktestConfig,
    loaded: &LoadedData,
    equity_curve: Vec<f64>,
    timeline: Timeline,
    marks: &HashMap<InstrumentId, f64>,
) -> BacktestResult {
    let ledger = ctx.ledger();
    let trades = ledger.history().to_vec();
    let metrics = PerformanceMetrics::compute(&equity_curve, &trades);
    let final_equity = ctx.equity(marks);
    let failures: Vec<String> = ctx.failures().iter().map(ToString::to_string).collect();
    if !failures.is_empty() {
        warn!("{} instrument failures during run", failures.len());
    }

    // Context::new rejects an empty date list.
    let start_date = loaded.dates.first().copied().unwrap_or_default();
    let end_date = loaded.dates.last().copied().unwrap_or_default();

    info!(
        "{}: {} trades, capital {} -> {}, equity {}",
        config.backtest.name,
        trades.len(),
        ctx.starting_capital(),
        ctx.capital(),
        final_equity
    );

    BacktestResult {
        schema_version: SCHEMA_VERSION,
        name: config.backtest.name.clone(),
        run_id: run_fingerprint(config, ctx.options(), &loaded.dataset_hash),
        options: ctx.options().clone(),
        metrics,
        trades,
        open_positions: ledger.inventory().cloned().collect(),
        equity_curve,
        timeline,
        starting_capital: ctx.starting_capital(),
        final_capital: ctx.capital(),
        final_equity,
        unrealized_profit: ctx.unrealized_profit(marks),
        realized_profit: ledger.profit(),
        win: ledger.win(),
        lose: ledger.lose(),
        start_date,
        end_date,
        date_count: loaded.dates.len(),
        dataset_hash: loaded.dataset_hash.clone(),
        has_synthetic: loaded.has_synthetic,
        failures,
    }
}

/// Deterministic id for a run: config with the effective options, plus the
/// dataset hash.
pub fn run_fingerprint(
    config: &BacktestConfig,
    options: &ContextOptions,
    dataset_hash: &str,
) -> RunId {
    let mut effective = config.clone();
    effective.options = options.clone();
    let mut hasher = blake3::Hasher::new();
    hasher.update(effective.run_id().as_bytes());
    hasher.update(dataset_hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Logs progress every [`ProgressLog::EVERY`] dates.
#[derive(Debug, Default)]
struct ProgressLog {
    seen: usize,
}

impl ProgressLog {
    const EVERY: usize = 250;
}

impl DateObserver for ProgressLog {
    fn name(&self) -> &str {
        "progress"
    }

    fn on_date(&mut self, date: NaiveDate) -> Result<(), ObserverError> {
        self.seen += 1;
        if self.seen % Self::EVERY == 0 {
            debug!("processed {} dates, at {date}", self.seen);
        }
        Ok(())
    }
}
