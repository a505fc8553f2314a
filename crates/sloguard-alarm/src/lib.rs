//! sloguard-alarm — SLO alarm evaluation.
//!
//! Each alarm is a small state machine over OK, ALARM and
//! INSUFFICIENT_DATA. Once per period the evaluator resolves the alarm's
//! metric for the most recent period, feeds the observation to the
//! machine, persists the resulting state and publishes a notification
//! when (and only when) the state changed.
//!
//! # Transition rules
//!
//! ```text
//! observation = value of [now - period, now)   (None when missing/undefined)
//!
//! None + missing       → INSUFFICIENT_DATA, counter = 0
//! None + ignore        → skip tick (state and counter unchanged)
//! None + breaching     → treat as breach
//! None + notBreaching  → treat as non-breach
//!
//! breach     → counter += 1; counter >= N → ALARM
//! non-breach → counter = 0; → OK
//! ```
//!
//! ALARM is sticky: staying in ALARM never re-notifies.

pub mod error;
pub mod evaluator;
pub mod machine;

pub use error::{AlarmError, AlarmResult};
pub use evaluator::AlarmEvaluator;
pub use machine::AlarmStateMachine;
