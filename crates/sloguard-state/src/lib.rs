//! sloguard-state — embedded state store for SloGuard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the three pieces of durable control-plane state:
//!
//! - the append-only journal of ingested metric samples,
//! - alarm state snapshots (the only records mutated in place),
//! - the append-only deployment record history.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{timestamp}:{seq}`, `{environment}:{timestamp}:{id}`)
//! keep related records adjacent so prefix scans stay cheap.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
