//! Date sequence — the sole driver of simulation time.
//!
//! Holds the trading calendar split into visited (`history`) and unvisited
//! (`future`) dates. `history ++ future` is always the original list, in
//! order. Each advance moves exactly one date across and notifies observers
//! synchronously, in registration order.

use chrono::NaiveDate;
use log::warn;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

use super::state::ConfigError;

/// An observer failed while handling a date.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Listener notified on every advance.
pub trait DateObserver {
    /// Human-readable name, used when reporting failures.
    fn name(&self) -> &str {
        "observer"
    }

    fn on_date(&mut self, date: NaiveDate) -> Result<(), ObserverError>;
}

/// One observer failure from a notification round.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverFailure {
    pub observer: String,
    pub date: NaiveDate,
    pub error: ObserverError,
}

impl fmt::Display for ObserverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer '{}' failed on {}: {}", self.observer, self.date, self.error)
    }
}

/// Result of one call to [`DateSequence::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Moved to `date`. `failures` lists observers that returned an error;
    /// every other observer was still notified.
    Advanced {
        date: NaiveDate,
        failures: Vec<ObserverFailure>,
    },
    /// No dates left. Nothing was mutated and nobody was notified.
    Exhausted,
}

impl Advance {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Advance::Exhausted)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Advance::Advanced { date, .. } => Some(*date),
            Advance::Exhausted => None,
        }
    }
}

pub struct DateSequence {
    future: VecDeque<NaiveDate>,
    history: Vec<NaiveDate>,
    current: Option<NaiveDate>,
    observers: Vec<Box<dyn DateObserver>>,
}

impl DateSequence {
    /// Build a sequence from a strictly increasing list of dates.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, ConfigError> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ConfigError::UnorderedDates(pair[1]));
        }
        Ok(Self {
            future: dates.into(),
            history: Vec::new(),
            current: None,
            observers: Vec::new(),
        })
    }

    /// Register an observer at the end of the notification list.
    pub fn attach(&mut self, observer: Box<dyn DateObserver>) {
        self.observers.push(observer);
    }

    /// Register an observer at the front of the notification list.
    pub fn bind(&mut self, observer: Box<dyn DateObserver>) {
        self.observers.insert(0, observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Move to the next date and notify every registered observer.
    pub fn advance(&mut self) -> Advance {
        self.advance_inner(None)
    }

    /// Like [`advance`](Self::advance), but `lead` is notified before every
    /// registered observer. The simulation context drives the sequence this
    /// way so it always sees a new date first.
    pub fn advance_with(&mut self, lead: &mut dyn DateObserver) -> Advance {
        self.advance_inner(Some(lead))
    }

    fn advance_inner(&mut self, lead: Option<&mut dyn DateObserver>) -> Advance {
        let Some(date) = self.future.pop_front() else {
            return Advance::Exhausted;
        };
        self.current = Some(date);
        self.history.push(date);

        let mut failures = Vec::new();
        if let Some(lead) = lead {
            notify(lead, date, &mut failures);
        }
        for observer in &mut self.observers {
            notify(observer.as_mut(), date, &mut failures);
        }
        Advance::Advanced { date, failures }
    }

    /// Rewind to before the first date. Observers are kept and not notified.
    pub fn reset(&mut self) {
        for date in self.history.drain(..).rev() {
            self.future.push_front(date);
        }
        self.current = None;
    }

    pub fn current(&self) -> Option<NaiveDate> {
        self.current
    }

    /// The date visited before the current one.
    pub fn previous(&self) -> Option<NaiveDate> {
        self.history.len().checked_sub(2).map(|i| self.history[i])
    }

    pub fn history(&self) -> &[NaiveDate] {
        &self.history
    }

    pub fn future(&self) -> impl ExactSizeIterator<Item = &NaiveDate> {
        self.future.iter()
    }

    pub fn remaining(&self) -> usize {
        self.future.len()
    }

    /// Total number of dates, visited or not.
    pub fn len(&self) -> usize {
        self.history.len() + self.future.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_exhausted(&self) -> bool {
        self.future.is_empty()
    }
}

fn notify(observer: &mut dyn DateObserver, date: NaiveDate, failures: &mut Vec<ObserverFailure>) {
    if let Err(error) = observer.on_date(date) {
        let failure = ObserverFailure {
            observer: observer.name().to_string(),
            date,
            error,
        };
        warn!("{failure}");
        failures.push(failure);
    }
}

impl fmt::Debug for DateSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DateSequence")
            .field("current", &self.current)
            .field("history", &self.history.len())
            .field("future", &self.future.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn dates() -> Vec<NaiveDate> {
        vec![
            NaiveDate::from_ymd_opt(2020, 7, 29).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 30).unwrap(),
            NaiveDate::from_ymd_opt(2020, 7, 31).unwrap(),
        ]
    }

    /// Appends its tag to a shared log on every date.
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<(&'static str, NaiveDate)>>>,
        fail: bool,
    }

    impl DateObserver for Recorder {
        fn name(&self) -> &str {
            self.tag
        }

        fn on_date(&mut self, date: NaiveDate) -> Result<(), ObserverError> {
            self.log.lock().unwrap().push((self.tag, date));
            if self.fail {
                Err(ObserverError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(
        tag: &'static str,
        log: &Arc<Mutex<Vec<(&'static str, NaiveDate)>>>,
    ) -> Box<Recorder> {
        Box::new(Recorder {
            tag,
            log: Arc::clone(log),
            fail: false,
        })
    }

    #[test]
    fn initial_state() {
        let seq = DateSequence::new(dates()).unwrap();
        assert_eq!(seq.current(), None);
        assert_eq!(seq.future().copied().collect::<Vec<_>>(), dates());
        assert!(seq.history().is_empty());
    }

    #[test]
    fn advance_moves_one_date() {
        let mut seq = DateSequence::new(dates()).unwrap();
        let step = seq.advance();
        assert_eq!(step.date(), Some(dates()[0]));
        assert_eq!(seq.current(), Some(dates()[0]));
        assert_eq!(seq.future().copied().collect::<Vec<_>>(), dates()[1..].to_vec());
        assert_eq!(seq.history(), &dates()[..1]);
    }

    #[test]
    fn exhaustion_is_idempotent() {
        let mut seq = DateSequence::new(dates()).unwrap();
        for _ in 0..3 {
            assert!(!seq.advance().is_exhausted());
        }
        assert!(seq.advance().is_exhausted());
        assert!(seq.advance().is_exhausted());
        assert_eq!(seq.current(), Some(dates()[2]));
        assert_eq!(seq.future().count(), 0);
        assert_eq!(seq.history(), dates().as_slice());
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut seq = DateSequence::new(dates()).unwrap();
        seq.advance();
        seq.advance();
        assert_eq!(seq.previous(), Some(dates()[0]));
        seq.reset();
        assert_eq!(seq.current(), None);
        assert_eq!(seq.future().copied().collect::<Vec<_>>(), dates());
        assert!(seq.history().is_empty());
        assert_eq!(seq.previous(), None);
    }

    #[test]
    fn observers_notified_once_per_advance() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut seq = DateSequence::new(dates()).unwrap();
        seq.attach(recorder("a", &log));
        seq.attach(recorder("b", &log));
        seq.advance();
        assert_eq!(*log.lock().unwrap(), vec![("a", dates()[0]), ("b", dates()[0])]);
    }

    #[test]
    fn bind_is_notified_before_attach() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut seq = DateSequence::new(dates()).unwrap();
        seq.attach(recorder("first-attached", &log));
        seq.bind(recorder("bound", &log));
        seq.attach(recorder("second-attached", &log));
        seq.advance();
        let order: Vec<_> = log.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(order, vec!["bound", "first-attached", "second-attached"]);
    }

    #[test]
    fn lead_runs_before_bound_observers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut seq = DateSequence::new(dates()).unwrap();
        seq.bind(recorder("bound", &log));
        let mut lead = Recorder {
            tag: "lead",
            log: Arc::clone(&log),
            fail: false,
        };
        seq.advance_with(&mut lead);
        let order: Vec<_> = log.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(order, vec!["lead", "bound"]);
    }

    #[test]
    fn failing_observer_does_not_stop_the_round() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut seq = DateSequence::new(dates()).unwrap();
        seq.attach(Box::new(Recorder {
            tag: "broken",
            log: Arc::clone(&log),
            fail: true,
        }));
        seq.attach(recorder("healthy", &log));

        let Advance::Advanced { failures, .. } = seq.advance() else {
            panic!("expected an advance");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].observer, "broken");
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausted_advance_notifies_nobody() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut seq = DateSequence::new(Vec::new()).unwrap();
        seq.attach(recorder("a", &log));
        assert!(seq.advance().is_exhausted());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(seq.current(), None);
    }

    #[test]
    fn unordered_dates_rejected() {
        let mut d = dates();
        d.swap(0, 1);
        assert_eq!(
            DateSequence::new(d).unwrap_err(),
            ConfigError::UnorderedDates(dates()[0])
        );
    }
}
