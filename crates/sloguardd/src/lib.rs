//! sloguardd — SloGuard daemon internals.
//!
//! The binary in `main.rs` parses the CLI and drives a [`ControlPlane`];
//! the assembly lives here so the HTTP surface can be tested end to end.

pub mod control_plane;
pub mod runtime;

pub use control_plane::ControlPlane;
pub use runtime::DryRunRuntime;
