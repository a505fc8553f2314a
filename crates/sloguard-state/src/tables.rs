//! redb table definitions for the SloGuard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Metric sample journal keyed by `{timestamp:020}:{seq:020}`.
pub const METRIC_SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("metric_samples");

/// Alarm state snapshots keyed by `{alarm_name}`.
pub const ALARM_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("alarm_states");

/// Deployment records keyed by `{environment}:{timestamp:020}:{id}`.
pub const DEPLOYMENT_RECORDS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("deployment_records");
