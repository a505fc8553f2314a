//! sloguard-notify — the notification stream of the control plane.
//!
//! Alarm transitions and deployment outcomes are published through a
//! [`Notifier`], which fans each event out to every registered
//! [`NotificationSink`] and to live broadcast subscribers.
//!
//! ```text
//! AlarmEvaluator ──┐
//!                  ├──► Notifier ──► sinks (log, memory, ...)
//! DeploymentGate ──┘         └─────► subscribe() → broadcast::Receiver
//! ```

pub mod notifier;
pub mod sink;

pub use notifier::Notifier;
pub use sink::{LogSink, MemorySink, NotificationSink};

use serde::{Deserialize, Serialize};

use sloguard_core::{AlarmStateValue, Timestamp};
use sloguard_state::DeploymentRecord;

/// One alarm state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmTransition {
    pub alarm_name: String,
    pub old_state: AlarmStateValue,
    pub new_state: AlarmStateValue,
    /// Value that drove the transition; `None` when it was caused by
    /// missing data.
    pub breaching_value: Option<f64>,
    pub timestamp: Timestamp,
}

/// An event published on the notification stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AlarmTransition(AlarmTransition),
    DeploymentOutcome(DeploymentRecord),
}

impl Notification {
    /// Short label for logs.
    pub fn subject(&self) -> String {
        match self {
            Notification::AlarmTransition(t) => {
                format!("alarm {}: {} -> {}", t.alarm_name, t.old_state, t.new_state)
            }
            Notification::DeploymentOutcome(r) => {
                format!("deployment {} to {}: {:?}", r.id, r.environment, r.outcome)
            }
        }
    }
}
