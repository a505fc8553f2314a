//! sloguard-gate — deployment gate for SloGuard.
//!
//! Takes a release from plan to a recorded outcome:
//!
//! 1. [`ReleasePlan::compute`] diffs the current and proposed resources
//!    without touching the runtime.
//! 2. High-risk environments wait for an operator confirmation.
//! 3. The plan is applied through a [`ReleaseActuator`].
//! 4. Readiness is polled with a [`HealthProbe`](sloguard_health::HealthProbe),
//!    then the environment's SLO alarms are watched for a fixed window.
//! 5. A failed verification triggers exactly one rollback when the
//!    environment's circuit breaker is on.
//!
//! Every attempt ends in a [`DeploymentRecord`](sloguard_state::DeploymentRecord)
//! appended to the state store and published on the notification stream.

pub mod error;
pub mod gate;
pub mod plan;
pub mod report;

pub use error::{GateError, GateResult};
pub use gate::{Claim, DeploymentGate, DeploymentStatus, GatePhase, ReleaseActuator};
pub use plan::{ChangeAction, PlanSummary, ReleasePlan, Resource, ResourceChange};
pub use report::{SloCheck, SloReport, SloStatus};
