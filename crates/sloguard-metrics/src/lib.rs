//! sloguard-metrics — telemetry ingestion and query for SloGuard.
//!
//! Holds every ingested sample in memory, grouped per series, and answers
//! bucketed statistic queries. Composite metrics (metric math over several
//! series) are evaluated on top of the same query interface, so alarms and
//! scaling policies resolve raw and derived metrics identically.
//!
//! # Architecture
//!
//! ```text
//! MetricStore
//!   ├── record() ← emit_metric from the runtime (optionally journaled)
//!   └── query()  → one value per period bucket, None when empty
//!
//! CompositeEvaluator
//!   ├── evaluate() → per-bucket Result<f64, MetricError>
//!   └── resolve_latest() → value of the most recent period
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod composite;
pub mod prometheus;
pub mod store;

pub use composite::{BucketValue, CompositeEvaluator};
pub use prometheus::{render_prometheus, CapacityGauge};
pub use store::{Bucket, MetricStore, SeriesPoint};
