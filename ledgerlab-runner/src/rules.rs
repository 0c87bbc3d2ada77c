//! Rule-based decisions built from config over a loaded bar table.
//!
//! A rule looks only at bars up to and including the evaluated date. When it
//! fires it returns the instrument's bar for that date.
//!
//! Confirmation: when the engine re-asks a rule for a pending marker, the rule
//! confirms whenever the instrument has a bar on the date. The trigger fires
//! on the signal bar, the fill happens on the next traded bar.

use std::sync::Arc;

use chrono::NaiveDate;
use ledgerlab_core::components::{Decision, DecisionError, DecisionList};
use ledgerlab_core::domain::{Instrument, MarketData};

use crate::config::RuleConfig;
use crate::data_loader::{BarSeries, BarTable};

/// A [`RuleConfig`] bound to the bar table it reads.
pub struct RuleDecision {
    rule: RuleConfig,
    name: String,
    table: Arc<BarTable>,
}

impl RuleDecision {
    pub fn new(rule: RuleConfig, table: Arc<BarTable>) -> Self {
        Self {
            name: rule.name(),
            rule,
            table,
        }
    }

    pub fn rule(&self) -> RuleConfig {
        self.rule
    }
}

impl Decision for RuleDecision {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
        pending: bool,
    ) -> Result<Option<MarketData>, DecisionError> {
        let series = self.table.series(&instrument.id).ok_or_else(|| {
            DecisionError::new(&self.name, format!("no bars loaded for {}", instrument.id))
        })?;
        let Some(index) = series.index_of(date) else {
            return Ok(None);
        };
        let bars = series.bars();
        if pending || fires(self.rule, series, index) {
            return Ok(Some(bars[index].clone()));
        }
        Ok(None)
    }
}

/// Whether `rule` fires on the bar at `index`.
pub fn fires(rule: RuleConfig, series: &BarSeries, index: usize) -> bool {
    let bars = series.bars();
    let close = bars[index].close;
    match rule {
        RuleConfig::Always => true,
        RuleConfig::EveryNthDate { n } => n > 0 && index % n == 0,
        RuleConfig::CloseAboveSma { period } => {
            sma(bars, index, period).is_some_and(|mean| close > mean)
        }
        RuleConfig::CloseBelowSma { period } => {
            sma(bars, index, period).is_some_and(|mean| close < mean)
        }
        RuleConfig::Breakout { lookback } => prior(bars, index, lookback)
            .map(|w| w.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max))
            .is_some_and(|high| close > high),
        RuleConfig::Breakdown { lookback } => prior(bars, index, lookback)
            .map(|w| w.iter().map(|b| b.low).fold(f64::INFINITY, f64::min))
            .is_some_and(|low| close < low),
    }
}

/// Simple moving average of the `period` closes ending at `index`. `None`
/// during warmup.
fn sma(bars: &[MarketData], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index + 1 < period {
        return None;
    }
    let window = &bars[index + 1 - period..=index];
    Some(window.iter().map(|b| b.close).sum::<f64>() / period as f64)
}

/// The `lookback` bars strictly before `index`. `None` during warmup.
fn prior(bars: &[MarketData], index: usize, lookback: usize) -> Option<&[MarketData]> {
    if lookback == 0 || index < lookback {
        return None;
    }
    Some(&bars[index - lookback..index])
}

/// Build an ordered decision list from rule configs.
pub fn build_decisions(rules: &[RuleConfig], table: &Arc<BarTable>) -> DecisionList {
    let decisions: Vec<Arc<dyn Decision>> = rules
        .iter()
        .map(|rule| Arc::new(RuleDecision::new(*rule, Arc::clone(table))) as Arc<dyn Decision>)
        .collect();
    DecisionList::new(decisions)
}
