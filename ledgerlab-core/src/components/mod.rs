//! Strategy components plugged into the simulation context.
//!
//! Only one kind exists: the decision function, used for both the buy side
//! and the sell side.

pub mod decision;

pub use decision::{decision_fn, Decision, DecisionError, DecisionList, FnDecision, Signal};
