//! Decision functions — user strategies that decide when to buy and sell.
//!
//! A decision looks at one instrument on one date and either returns the
//! market data record that justifies acting, or nothing. Decisions are
//! registered as an ordered list: on a fresh evaluation the first decision
//! that returns data wins; while a marker is pending only the first decision
//! is consulted again, as the confirmation check.

use crate::domain::{Instrument, MarketData};
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A decision function failed for one instrument on one date.
///
/// The engine logs it and treats it as "no signal".
#[derive(Debug, Clone, Error, PartialEq)]
#[error("decision '{decision}' failed: {message}")]
pub struct DecisionError {
    pub decision: String,
    pub message: String,
}

impl DecisionError {
    pub fn new(decision: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            message: message.into(),
        }
    }
}

/// Trait for buy/sell decisions.
///
/// `pending` is true when the ledger already holds a pending marker for this
/// side of the instrument, so the call is a confirmation of an earlier trigger.
pub trait Decision: Send + Sync {
    /// Human-readable name (e.g., "close_above_sma_20").
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
        pending: bool,
    ) -> Result<Option<MarketData>, DecisionError>;
}

/// Adapter turning a closure into a [`Decision`].
pub struct FnDecision<F> {
    name: String,
    func: F,
}

impl<F> FnDecision<F>
where
    F: Fn(&Instrument, NaiveDate, bool) -> Result<Option<MarketData>, DecisionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Decision for FnDecision<F>
where
    F: Fn(&Instrument, NaiveDate, bool) -> Result<Option<MarketData>, DecisionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
        pending: bool,
    ) -> Result<Option<MarketData>, DecisionError> {
        (self.func)(instrument, date, pending)
    }
}

/// Wrap a closure as a shareable decision.
pub fn decision_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn Decision>
where
    F: Fn(&Instrument, NaiveDate, bool) -> Result<Option<MarketData>, DecisionError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnDecision::new(name, func))
}

/// The record a decision returned, tagged with the decision that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub decision: String,
    pub data: MarketData,
}

/// Ordered list of decisions with first-match evaluation.
#[derive(Clone, Default)]
pub struct DecisionList {
    decisions: Vec<Arc<dyn Decision>>,
}

impl DecisionList {
    pub fn new(decisions: Vec<Arc<dyn Decision>>) -> Self {
        Self { decisions }
    }

    pub fn push(&mut self, decision: Arc<dyn Decision>) {
        self.decisions.push(decision);
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.decisions.iter().map(|d| d.name()).collect()
    }

    /// Evaluate the list for one instrument on one date.
    ///
    /// When `pending` is set only the first decision runs. Otherwise every
    /// decision runs in registration order until one returns data. An error
    /// stops the evaluation: later decisions are not consulted.
    pub fn evaluate(
        &self,
        instrument: &Instrument,
        date: NaiveDate,
        pending: bool,
    ) -> Result<Option<Signal>, DecisionError> {
        if pending {
            let Some(first) = self.decisions.first() else {
                return Ok(None);
            };
            return Ok(first.evaluate(instrument, date, true)?.map(|data| Signal {
                decision: first.name().to_string(),
                data,
            }));
        }

        for decision in &self.decisions {
            if let Some(data) = decision.evaluate(instrument, date, false)? {
                return Ok(Some(Signal {
                    decision: decision.name().to_string(),
                    data,
                }));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for DecisionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl From<Vec<Arc<dyn Decision>>> for DecisionList {
    fn from(decisions: Vec<Arc<dyn Decision>>) -> Self {
        Self::new(decisions)
    }
}
