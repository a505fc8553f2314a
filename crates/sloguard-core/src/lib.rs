//! sloguard-core — shared vocabulary for the SloGuard control plane.
//!
//! Every subsystem (metric store, alarms, autoscaling, deployment gate)
//! speaks in the types defined here. Configuration parsing lives here too
//! so that a single `sloguard.toml` can be compiled into domain objects
//! without the daemon knowing about expression syntax or duration strings.

pub mod config;
pub mod error;
pub mod expr;
pub mod time;
pub mod types;

pub use config::ControlConfig;
pub use error::{ActuationError, ConfigError, MetricError, MetricResult};
pub use expr::{parse_expression, ParseError};
pub use time::{Clock, epoch_secs, parse_duration, period_end, system_clock};
pub use types::*;
