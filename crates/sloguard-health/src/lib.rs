//! sloguard-health — readiness probing for post-deploy verification.
//!
//! The deployment gate only needs a boolean "is it ready" answer from the
//! runtime. [`HealthProbe`] is that seam; [`HttpReadinessProbe`] answers it
//! with a plain HTTP GET where any 2xx means ready.
//!
//! # Architecture
//!
//! ```text
//! DeploymentGate (verify phase)
//!   └── HealthProbe::probe(target) → bool
//!         └── HttpReadinessProbe
//!               └── http_probe() → ProbeResult (Healthy | Unhealthy | Failed)
//! ```

pub mod probe;

pub use probe::{HealthProbe, HttpReadinessProbe, ProbeResult, http_probe};
