//! Simulation context — drives the buy/sell state machines one date at a time.
//!
//! Per instrument and per date two independent machines run in sequence, buy
//! then sell. Each has two states, idle and pending: the first time a
//! decision returns data the ledger only records a pending marker, and the
//! fill happens on a later date when the first decision confirms it.
//!
//! Instruments are processed in the order the caller supplied them. Capital
//! is shared, so a fill for an early instrument can leave too little for a
//! later one on the same date.

use crate::components::{DecisionError, DecisionList};
use crate::domain::{Instrument, InstrumentId, MarketData};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::date_sequence::{Advance, DateObserver, DateSequence, ObserverError, ObserverFailure};
use super::ledger::{Ledger, LedgerError};
use super::state::{ConfigError, ContextOptions};
use super::transaction::Transaction;

/// Why one instrument's processing on one date was abandoned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("decision '{decision}' returned unusable prices for {date}")]
    InvalidData { decision: String, date: NaiveDate },
    #[error("fill of {fill} overflows the capital or profit account")]
    Overflow { fill: i64 },
}

/// A [`StepError`] tagged with where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentFailure {
    pub date: NaiveDate,
    pub instrument_id: InstrumentId,
    pub error: StepError,
}

impl fmt::Display for InstrumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.instrument_id, self.date, self.error)
    }
}

/// Outcome of [`Context::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Continue(NaiveDate),
    Exhausted,
}

impl StepStatus {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, StepStatus::Exhausted)
    }
}

/// Everything the context mutates while processing a date.
///
/// Registered as the lead observer of the date sequence, so it sees each new
/// date before any other listener.
struct Session {
    instruments: Vec<Instrument>,
    buy: DecisionList,
    sell: DecisionList,
    options: ContextOptions,
    transaction: Transaction,
    ledger: Ledger,
    capital: i64,
    /// Date processed before the current one.
    previous: Option<NaiveDate>,
    current: Option<NaiveDate>,
    failures: Vec<InstrumentFailure>,
}

impl Session {
    fn process(&mut self, date: NaiveDate) {
        for index in 0..self.instruments.len() {
            let instrument = self.instruments[index].clone();
            if let Err(err) = self.buy_flow(&instrument, date) {
                self.record_failure(&instrument, date, err);
            }
            if let Err(err) = self.sell_flow(&instrument, date) {
                self.record_failure(&instrument, date, err);
            }
        }
    }

    fn buy_flow(&mut self, instrument: &Instrument, date: NaiveDate) -> Result<(), StepError> {
        let id = &instrument.id;
        if self.ledger.is_in_inventory(id) {
            return Ok(());
        }

        let pending_since = self.ledger.pending_purchase(id).map(|m| m.since);
        if let (Some(since), Some(previous)) = (pending_since, self.previous) {
            if since < previous {
                debug!("{id}: pending purchase from {since} expired");
                self.ledger.clear_pending_purchase(id);
                return Ok(());
            }
        }
        let pending = pending_since.is_some();

        let Some(signal) = self.buy.evaluate(instrument, date, pending)? else {
            return Ok(());
        };
        let data = checked(signal.decision, signal.data, date)?;

        if !self.options.price_band.contains(data.low) {
            if pending {
                debug!("{id}: low {} left the price band, dropping pending purchase", data.low);
                self.ledger.clear_pending_purchase(id);
            }
            return Ok(());
        }

        let fill = self.transaction.buy_fill(data.price(self.options.buy_price_field));
        if fill > self.capital {
            if pending {
                let capital = self.capital;
                debug!("{id}: fill {fill} exceeds capital {capital}, dropping pending purchase");
                self.ledger.clear_pending_purchase(id);
            }
            return Ok(());
        }

        if pending {
            self.ledger.record_buy_fill(instrument, data, fill, date)?;
            self.capital -= fill;
            info!("{date} BUY {instrument} for {fill}, capital {}", self.capital);
        } else {
            self.ledger.mark_pending_purchase(instrument, data, date)?;
            debug!("{date} WAIT_BUY {instrument}");
        }
        Ok(())
    }

    fn sell_flow(&mut self, instrument: &Instrument, date: NaiveDate) -> Result<(), StepError> {
        let id = &instrument.id;
        let Some(entry) = self.ledger.inventory_entry(id) else {
            return Ok(());
        };
        if entry.buy_date == date {
            return Ok(());
        }
        let buy_price = entry.buy_price;
        let pending = self.ledger.is_pending_sale(id);

        let Some(signal) = self.sell.evaluate(instrument, date, pending)? else {
            return Ok(());
        };
        let data = checked(signal.decision, signal.data, date)?;
        let fill = self.transaction.sell_fill(data.price(self.options.sell_price_field));

        if pending {
            let capital = self
                .capital
                .checked_add(fill)
                .filter(|_| self.ledger.profit().checked_add(fill - buy_price).is_some())
                .ok_or(StepError::Overflow { fill })?;
            let profit = self.ledger.record_sell_fill(instrument, data, fill, date)?.profit();
            self.capital = capital;
            info!(
                "{date} SELL {instrument} for {fill} (profit {profit}), capital {}",
                self.capital
            );
            return Ok(());
        }

        if let Some(loss) = self.options.stop_loss {
            let floor = buy_price as f64 - buy_price as f64 * loss;
            if floor > self.transaction.notional(data.low) {
                debug!("{id}: stop loss hit at low {}", data.low);
            }
        }
        self.ledger.mark_pending_sale(instrument, data, date)?;
        debug!("{date} WAIT_SELL {instrument}");
        Ok(())
    }

    fn record_failure(&mut self, instrument: &Instrument, date: NaiveDate, error: StepError) {
        let failure = InstrumentFailure {
            date,
            instrument_id: instrument.id.clone(),
            error,
        };
        match failure.error {
            StepError::Ledger(_) => error!("{failure}"),
            _ => warn!("{failure}"),
        }
        self.failures.push(failure);
    }

    fn reset(&mut self) {
        self.ledger.reset();
        self.capital = self.options.starting_capital;
        self.previous = None;
        self.current = None;
        self.failures.clear();
    }
}

impl DateObserver for Session {
    fn name(&self) -> &str {
        "context"
    }

    fn on_date(&mut self, date: NaiveDate) -> Result<(), ObserverError> {
        self.previous = self.current.replace(date);
        self.process(date);
        Ok(())
    }
}

fn checked(decision: String, data: MarketData, date: NaiveDate) -> Result<MarketData, StepError> {
    if data.is_sane() {
        Ok(data)
    } else {
        Err(StepError::InvalidData { decision, date })
    }
}

/// The simulation: a date sequence, the tracked instruments, the buy and sell
/// decision lists, a ledger and the capital account.
pub struct Context {
    dates: DateSequence,
    session: Session,
    last_observer_failures: Vec<ObserverFailure>,
}

impl Context {
    pub fn new(
        dates: Vec<NaiveDate>,
        instruments: Vec<Instrument>,
        buy: DecisionList,
        sell: DecisionList,
        options: ContextOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        if dates.is_empty() {
            return Err(ConfigError::EmptyDates);
        }
        let dates = DateSequence::new(dates)?;
        if buy.is_empty() {
            warn!("no buy decisions registered, the run will never open a position");
        }
        Ok(Self {
            dates,
            session: Session {
                instruments,
                buy,
                sell,
                transaction: options.transaction(),
                ledger: Ledger::new(),
                capital: options.starting_capital,
                options,
                previous: None,
                current: None,
                failures: Vec::new(),
            },
            last_observer_failures: Vec::new(),
        })
    }

    /// Process the next date. Returns `Exhausted` once every date has been
    /// visited, and on every call after that.
    pub fn step(&mut self) -> StepStatus {
        match self.dates.advance_with(&mut self.session) {
            Advance::Advanced { date, failures } => {
                self.last_observer_failures = failures;
                StepStatus::Continue(date)
            }
            Advance::Exhausted => {
                self.last_observer_failures.clear();
                StepStatus::Exhausted
            }
        }
    }

    /// Step until exhausted. Returns the number of dates processed.
    pub fn run(&mut self) -> usize {
        let mut processed = 0;
        while !self.step().is_exhausted() {
            processed += 1;
        }
        processed
    }

    /// Rewind to the first date with an empty ledger and the starting capital.
    ///
    /// The timeline is kept.
    pub fn reset(&mut self) {
        self.dates.reset();
        self.session.reset();
        self.last_observer_failures.clear();
    }

    /// Install new options, then [`reset`](Self::reset). Invalid options leave
    /// the context untouched.
    pub fn reset_with(&mut self, options: ContextOptions) -> Result<(), ConfigError> {
        options.validate()?;
        self.session.transaction = options.transaction();
        self.session.options = options;
        self.reset();
        Ok(())
    }

    /// Register a listener notified after the context on every date.
    pub fn attach_observer(&mut self, observer: Box<dyn DateObserver>) {
        self.dates.attach(observer);
    }

    /// Register a listener ahead of the other attached listeners (still after
    /// the context itself).
    pub fn bind_observer(&mut self, observer: Box<dyn DateObserver>) {
        self.dates.bind(observer);
    }

    pub fn capital(&self) -> i64 {
        self.session.capital
    }

    pub fn starting_capital(&self) -> i64 {
        self.session.options.starting_capital
    }

    pub fn ledger(&self) -> &Ledger {
        &self.session.ledger
    }

    pub fn dates(&self) -> &DateSequence {
        &self.dates
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.dates.current()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.session.options
    }

    pub fn transaction(&self) -> &Transaction {
        &self.session.transaction
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.session.instruments
    }

    /// Decision and ledger failures caught since the last reset.
    pub fn failures(&self) -> &[InstrumentFailure] {
        &self.session.failures
    }

    /// Failures reported by attached observers during the last step.
    pub fn last_observer_failures(&self) -> &[ObserverFailure] {
        &self.last_observer_failures
    }

    /// Profit if every open position were sold at its mark.
    ///
    /// `marks` maps an instrument to a unit price; positions without a mark
    /// are left out.
    pub fn unrealized_profit(&self, marks: &HashMap<InstrumentId, f64>) -> i64 {
        self.ledger()
            .inventory()
            .filter_map(|entry| {
                let mark = marks.get(&entry.instrument_id)?;
                Some(self.session.transaction.sell_fill(*mark) - entry.buy_price)
            })
            .sum()
    }

    /// Capital plus open positions marked to `marks`. Unmarked positions count
    /// at their buy price.
    pub fn equity(&self, marks: &HashMap<InstrumentId, f64>) -> i64 {
        let held: i64 = self
            .ledger()
            .inventory()
            .map(|entry| match marks.get(&entry.instrument_id) {
                Some(mark) => self.session.transaction.sell_fill(*mark),
                None => entry.buy_price,
            })
            .sum();
        self.capital() + held
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dates", &self.dates)
            .field("instruments", &self.session.instruments.len())
            .field("buy", &self.session.buy)
            .field("sell", &self.session.sell)
            .field("capital", &self.session.capital)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::decision_fn;
    use crate::domain::TimelineKind;
    use crate::engine::state::PriceBand;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 7, d).unwrap()
    }

    fn bar(date: NaiveDate, price: f64) -> MarketData {
        MarketData::new(date, price, price, price, price)
    }

    fn always(price: f64) -> DecisionList {
        DecisionList::new(vec![decision_fn("always", move |_, date, _| {
            Ok(Some(bar(date, price)))
        })])
    }

    fn never() -> DecisionList {
        DecisionList::new(vec![decision_fn("never", |_, _, _| Ok(None))])
    }

    fn context(days: &[u32], buy: DecisionList, sell: DecisionList) -> Context {
        Context::new(
            days.iter().map(|&d| day(d)).collect(),
            vec![Instrument::new("2330", "TSMC")],
            buy,
            sell,
            ContextOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn first_touch_only_marks_pending() {
        let mut ctx = context(&[27], always(10.0), never());
        assert_eq!(ctx.step(), StepStatus::Continue(day(27)));
        let id = InstrumentId::new("2330");
        assert!(ctx.ledger().is_pending_purchase(&id));
        assert!(!ctx.ledger().is_in_inventory(&id));
        assert_eq!(ctx.capital(), 300_000);
    }

    #[test]
    fn confirmation_fills_and_deducts_capital() {
        let mut ctx = context(&[27, 28], always(10.0), never());
        ctx.run();
        let id = InstrumentId::new("2330");
        assert!(ctx.ledger().is_in_inventory(&id));
        assert_eq!(ctx.capital(), 300_000 - 10_020);
        let kinds: Vec<_> = ctx.ledger().timeline().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TimelineKind::WaitBuy, TimelineKind::Buy]);
    }

    #[test]
    fn no_same_day_round_trip() {
        let mut ctx = context(&[27, 28], always(10.0), always(10.0));
        ctx.run();
        // bought on the 28th, sell machine skipped on the same date
        assert!(!ctx.ledger().is_pending_sale(&InstrumentId::new("2330")));
    }

    #[test]
    fn exhausted_forever() {
        let mut ctx = context(&[27], never(), never());
        assert_eq!(ctx.run(), 1);
        assert!(ctx.step().is_exhausted());
        assert!(ctx.step().is_exhausted());
    }

    #[test]
    fn decision_error_is_contained() {
        let buy = DecisionList::new(vec![decision_fn("flaky", |inst, date, _| {
            if inst.id.as_str() == "2330" {
                Err(DecisionError::new("flaky", "indicator cache miss"))
            } else {
                Ok(Some(bar(date, 10.0)))
            }
        })]);
        let mut ctx = Context::new(
            vec![day(27)],
            vec![Instrument::new("2330", "TSMC"), Instrument::new("2317", "Hon Hai")],
            buy,
            never(),
            ContextOptions::default(),
        )
        .unwrap();
        ctx.run();
        assert_eq!(ctx.failures().len(), 1);
        assert!(matches!(ctx.failures()[0].error, StepError::Decision(_)));
        assert!(ctx.ledger().is_pending_purchase(&InstrumentId::new("2317")));
    }

    #[test]
    fn insane_prices_are_reported() {
        let mut ctx = context(&[27], always(f64::NAN), never());
        ctx.run();
        assert!(matches!(ctx.failures()[0].error, StepError::InvalidData { .. }));
        assert!(ctx.ledger().timeline().is_empty());
    }

    #[test]
    fn overflowing_sell_fill_leaves_the_position_open() {
        let sell = DecisionList::new(vec![decision_fn("moon", |_, date, _| {
            Ok(Some(bar(date, 1e16)))
        })]);
        let mut ctx = context(&[27, 28, 29, 30], always(10.0), sell);
        ctx.run();

        let id = InstrumentId::new("2330");
        assert!(ctx.ledger().is_in_inventory(&id));
        assert!(ctx.ledger().history().is_empty());
        assert_eq!(ctx.ledger().timeline().count(TimelineKind::Sell), 0);
        assert_eq!(ctx.capital(), 300_000 - 10_020);
        assert!(matches!(ctx.failures()[0].error, StepError::Overflow { .. }));
    }

    #[test]
    fn reset_with_validates_first() {
        let mut ctx = context(&[27, 28], always(10.0), never());
        ctx.run();
        let bad = ContextOptions {
            price_band: PriceBand::new(Some(5.0), Some(1.0)),
            ..Default::default()
        };
        assert!(ctx.reset_with(bad).is_err());
        assert_eq!(ctx.capital(), 300_000 - 10_020);

        let richer = ContextOptions {
            starting_capital: 1_000_000,
            ..Default::default()
        };
        ctx.reset_with(richer).unwrap();
        assert_eq!(ctx.capital(), 1_000_000);
        assert_eq!(ctx.current_date(), None);
        assert_eq!(ctx.ledger().inventory_len(), 0);
    }

    #[test]
    fn equity_marks_open_positions() {
        let mut ctx = context(&[27, 28], always(10.0), never());
        ctx.run();
        let mut marks = HashMap::new();
        marks.insert(InstrumentId::new("2330"), 12.0);
        // sell_fill(12) = round((12_000 + 20) * 1.003) = 12_056
        assert_eq!(ctx.unrealized_profit(&marks), 12_056 - 10_020);
        assert_eq!(ctx.equity(&marks), 300_000 - 10_020 + 12_056);
        assert_eq!(ctx.equity(&HashMap::new()), 300_000);
    }
}
