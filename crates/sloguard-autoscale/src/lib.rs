//! sloguard-autoscale — capacity control for scalable targets.
//!
//! One [`ScalingController`] per target evaluates its attached policies on
//! every tick and resolves them into a single capacity:
//!
//! ```text
//! bounds   = target [min, max], overridden by any active scheduled policy
//! tracking = clamp(round(current * metric / target_value), bounds)
//! schedule = clamp(current, scheduled [min, max])
//! predict  = clamp(round(current * forecast / target_value),
//!                  min, max (+ max_capacity_buffer unless HonorMaxCapacity))
//!
//! desired  = max(all proposals)
//! cooldown = per direction; any recent scale-out blocks further scale-out
//! ```
//!
//! A policy whose metric cannot be resolved is skipped for that tick.

pub mod controller;
pub mod error;
pub mod policy;
pub mod registry;
pub mod schedule;

pub use controller::{CapacityActuator, ScalableTarget, ScaleDecision, ScalingController};
pub use error::{ScalingError, ScalingResult};
pub use policy::{Bounds, Proposal};
pub use registry::ScalingRegistry;
pub use schedule::CronSchedule;
