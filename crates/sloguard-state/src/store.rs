//! StateStore — redb-backed persistence for SloGuard.
//!
//! Typed operations over the metric sample journal, alarm state snapshots,
//! and deployment history. All values are JSON-serialized into redb's
//! `&[u8]` value columns. Supports on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use sloguard_core::Timestamp;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Closure turning a redb or serde error into the given `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
    ($variant:ident, $record:expr) => {
        |e| StateError::$variant {
            record: $record,
            reason: e.to_string(),
        }
    };
}

fn sample_key(timestamp: Timestamp, seq: u64) -> String {
    format!("{timestamp:020}:{seq:020}")
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Next sequence number for journal keys.
    sample_seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let store = Self {
            db: Arc::new(db),
            sample_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        let next = store.max_sample_seq()?.map(|s| s + 1).unwrap_or(0);
        store.sample_seq.store(next, Ordering::SeqCst);
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(ALARM_STATES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Commit))?;
        Ok(())
    }

    fn max_sample_seq(&self) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
        let mut max = None;
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, _) = entry.map_err(map_err!(Storage))?;
            let seq = key
                .value()
                .rsplit(':')
                .next()
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(seq) = seq {
                max = Some(max.map_or(seq, |m: u64| m.max(seq)));
            }
        }
        Ok(max)
    }

    // ── Metric samples ─────────────────────────────────────────────

    /// Append samples to the journal in one transaction.
    pub fn append_samples(&self, samples: &[MetricSample]) -> StateResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            for sample in samples {
                let seq = self.sample_seq.fetch_add(1, Ordering::SeqCst);
                let key = sample_key(sample.timestamp, seq);
                let value = serde_json::to_vec(sample).map_err(map_err!(Encode, "metric sample"))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Commit))?;
        Ok(())
    }

    /// Append a single sample to the journal.
    pub fn append_sample(&self, sample: &MetricSample) -> StateResult<()> {
        self.append_samples(std::slice::from_ref(sample))
    }

    /// All journaled samples, ordered by timestamp then arrival.
    pub fn list_samples(&self) -> StateResult<Vec<MetricSample>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let sample: MetricSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode, "metric sample"))?;
            results.push(sample);
        }
        Ok(results)
    }

    /// Drop journaled samples older than `cutoff`. Returns number deleted.
    pub fn prune_samples_before(&self, cutoff: Timestamp) -> StateResult<u32> {
        let bound = sample_key(cutoff, 0);
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Storage))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    (k < bound).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Commit))?;
        debug!(cutoff, count, "pruned metric journal");
        Ok(count)
    }

    // ── Alarm states ───────────────────────────────────────────────

    /// Insert or overwrite an alarm state snapshot.
    pub fn put_alarm_state(&self, state: &AlarmState) -> StateResult<()> {
        let key = state.table_key();
        let value = serde_json::to_vec(state).map_err(map_err!(Encode, "alarm state"))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALARM_STATES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        Ok(())
    }

    /// Get an alarm state by alarm name.
    pub fn get_alarm_state(&self, name: &str) -> StateResult<Option<AlarmState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARM_STATES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Storage))? {
            Some(guard) => {
                let state: AlarmState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode, "alarm state"))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// List all alarm states.
    pub fn list_alarm_states(&self) -> StateResult<Vec<AlarmState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARM_STATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let state: AlarmState =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode, "alarm state"))?;
            results.push(state);
        }
        Ok(results)
    }

    // ── Deployment records ─────────────────────────────────────────

    /// Append a deployment record. Records are never rewritten.
    pub fn append_deployment_record(&self, record: &DeploymentRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Encode, "deployment record"))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENT_RECORDS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Commit))?;
        debug!(%key, outcome = ?record.outcome, "deployment record appended");
        Ok(())
    }

    /// Most recent deployment records for an environment, newest first.
    pub fn list_deployment_records(
        &self,
        environment: &str,
        limit: usize,
    ) -> StateResult<Vec<DeploymentRecord>> {
        let prefix = format!("{environment}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))?.rev() {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            if key.value().starts_with(&prefix) {
                let record: DeploymentRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Decode, "deployment record"))?;
                results.push(record);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloguard_core::{AlarmStateValue, RiskTier};

    fn test_record(environment: &str, timestamp: u64, outcome: DeploymentOutcome) -> DeploymentRecord {
        DeploymentRecord {
            id: format!("{environment}-{timestamp}"),
            environment: environment.to_string(),
            timestamp,
            outcome,
            risk_tier: RiskTier::for_environment(environment),
            change_count: 2,
            verification_results: vec![VerificationResult::pass("health_probe", "ready")],
            rollback_issued: outcome == DeploymentOutcome::RolledBack,
            error: None,
        }
    }

    // ── Metric samples ─────────────────────────────────────────────

    #[test]
    fn samples_append_and_list_in_time_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_sample(&MetricSample::new("cpu", 200, 50.0)).unwrap();
        store.append_sample(&MetricSample::new("cpu", 100, 40.0)).unwrap();
        store
            .append_samples(&[
                MetricSample::new("cpu", 100, 41.0),
                MetricSample::new("mem", 150, 1.0).with_dimension("host", "a"),
            ])
            .unwrap();

        let all = store.list_samples().unwrap();
        let timestamps: Vec<u64> = all.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![100, 100, 150, 200]);
        // Duplicates at the same timestamp are both kept.
        assert_eq!(all[0].value, 40.0);
        assert_eq!(all[1].value, 41.0);
        assert_eq!(all[2].dimensions["host"], "a");
    }

    #[test]
    fn prune_samples() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in [10u64, 20, 30, 40] {
            store.append_sample(&MetricSample::new("cpu", ts, 1.0)).unwrap();
        }
        assert_eq!(store.prune_samples_before(30).unwrap(), 2);
        let left: Vec<u64> = store.list_samples().unwrap().iter().map(|s| s.timestamp).collect();
        assert_eq!(left, vec![30, 40]);
    }

    // ── Alarm states ───────────────────────────────────────────────

    #[test]
    fn alarm_state_overwrites_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut state = AlarmState::new("latency-slo");
        store.put_alarm_state(&state).unwrap();

        state.current_state = AlarmStateValue::Alarm;
        state.consecutive_breaching_periods = 3;
        state.last_transition_time = Some(1_000);
        store.put_alarm_state(&state).unwrap();

        let stored = store.get_alarm_state("latency-slo").unwrap().unwrap();
        assert_eq!(stored, state);
        assert_eq!(store.list_alarm_states().unwrap().len(), 1);
    }

    #[test]
    fn alarm_state_missing_is_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_alarm_state("nope").unwrap().is_none());
    }

    // ── Deployment records ─────────────────────────────────────────

    #[test]
    fn deployment_history_newest_first_per_environment() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .append_deployment_record(&test_record("prod", 100, DeploymentOutcome::Success))
            .unwrap();
        store
            .append_deployment_record(&test_record("prod", 300, DeploymentOutcome::RolledBack))
            .unwrap();
        store
            .append_deployment_record(&test_record("dev", 200, DeploymentOutcome::Failed))
            .unwrap();

        let prod = store.list_deployment_records("prod", 10).unwrap();
        assert_eq!(prod.len(), 2);
        assert_eq!(prod[0].timestamp, 300);
        assert_eq!(prod[0].outcome, DeploymentOutcome::RolledBack);

        let limited = store.list_deployment_records("prod", 1).unwrap();
        assert_eq!(limited.len(), 1);

        assert_eq!(store.list_deployment_records("dev", 10).unwrap().len(), 1);
        assert!(store.list_deployment_records("staging", 10).unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.append_sample(&MetricSample::new("cpu", 10, 1.0)).unwrap();
            store.put_alarm_state(&AlarmState::new("a")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        // Sequence numbers continue after reopen, so nothing is overwritten.
        store.append_sample(&MetricSample::new("cpu", 10, 2.0)).unwrap();
        let samples = store.list_samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(store.get_alarm_state("a").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_samples().unwrap().is_empty());
        assert!(store.list_alarm_states().unwrap().is_empty());
        assert!(store.list_deployment_records("prod", 10).unwrap().is_empty());
        assert_eq!(store.prune_samples_before(100).unwrap(), 0);
        store.append_samples(&[]).unwrap();
    }
}
