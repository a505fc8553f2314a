//! Metric store — per-series sample buffers with bucketed queries.
//!
//! The outer map is only write-locked when a new series appears; appends
//! and queries take the per-series lock, so ingestion on one series never
//! waits on readers of another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use sloguard_core::{SeriesSelector, Statistic, TimeRange, Timestamp};
use sloguard_state::{MetricSample, StateResult, StateStore};

/// Samples of a single series in arrival order.
#[derive(Default)]
struct Series {
    points: Vec<(Timestamp, f64)>,
}

/// One period bucket of a query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: Timestamp,
    /// `None` when no sample fell in the bucket.
    pub value: Option<f64>,
}

/// Most recent observation of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub selector: SeriesSelector,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// In-memory time-series store.
pub struct MetricStore {
    series: RwLock<HashMap<SeriesSelector, Arc<RwLock<Series>>>>,
    /// Optional durable journal of every recorded sample.
    journal: Option<StateStore>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    /// Create an empty, non-journaled store.
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Create an empty store that journals every sample to `state`.
    pub fn with_journal(state: StateStore) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            journal: Some(state),
        }
    }

    /// Rebuild a journaled store from the samples already in `state`.
    pub async fn restore(state: StateStore) -> StateResult<Self> {
        let samples = state.list_samples()?;
        let store = Self::with_journal(state);
        let count = samples.len();
        for sample in samples {
            store.insert(sample).await;
        }
        info!(samples = count, "metric store restored from journal");
        Ok(store)
    }

    /// Append a sample to its series.
    ///
    /// No dedup and no ordering requirement: out-of-order samples are
    /// accepted and sorted at query time.
    pub async fn record(&self, sample: MetricSample) -> StateResult<()> {
        if let Some(journal) = &self.journal {
            journal.append_sample(&sample)?;
        }
        self.insert(sample).await;
        Ok(())
    }

    /// Append many samples; the journal write is a single transaction.
    pub async fn record_batch(&self, samples: Vec<MetricSample>) -> StateResult<()> {
        if let Some(journal) = &self.journal {
            journal.append_samples(&samples)?;
        }
        for sample in samples {
            self.insert(sample).await;
        }
        Ok(())
    }

    async fn insert(&self, sample: MetricSample) {
        let selector = sample.selector();
        let series = self.series_handle(&selector).await;
        series
            .write()
            .await
            .points
            .push((sample.timestamp, sample.value));
    }

    async fn series_handle(&self, selector: &SeriesSelector) -> Arc<RwLock<Series>> {
        {
            let map = self.series.read().await;
            if let Some(s) = map.get(selector) {
                return Arc::clone(s);
            }
        }
        let mut map = self.series.write().await;
        let entry = map.entry(selector.clone()).or_insert_with(|| {
            debug!(series = %selector, "new series");
            Arc::new(RwLock::new(Series::default()))
        });
        Arc::clone(entry)
    }

    /// Query one statistic per `period_secs` bucket across `range`.
    ///
    /// Buckets are `[range.start + i*period, ...)`; the last bucket is cut
    /// at `range.end`. An unknown series yields all-empty buckets.
    pub async fn query(
        &self,
        selector: &SeriesSelector,
        range: TimeRange,
        period_secs: u64,
        statistic: Statistic,
    ) -> Vec<Bucket> {
        let period = period_secs.max(1);
        let bucket_count = range.len_secs().div_ceil(period) as usize;
        let mut grouped: Vec<Vec<f64>> = vec![Vec::new(); bucket_count];

        let handle = {
            let map = self.series.read().await;
            map.get(selector).cloned()
        };
        if let Some(series) = handle {
            let series = series.read().await;
            let mut points: Vec<(Timestamp, f64)> = series
                .points
                .iter()
                .copied()
                .filter(|(ts, _)| range.contains(*ts))
                .collect();
            drop(series);
            points.sort_by_key(|(ts, _)| *ts);
            for (ts, value) in points {
                let idx = ((ts - range.start) / period) as usize;
                if let Some(bucket) = grouped.get_mut(idx) {
                    bucket.push(value);
                }
            }
        }

        grouped
            .into_iter()
            .enumerate()
            .map(|(i, mut values)| Bucket {
                start: range.start + i as u64 * period,
                value: aggregate(&mut values, statistic),
            })
            .collect()
    }

    /// Latest sample of every series, sorted by series key.
    pub async fn latest_points(&self) -> Vec<SeriesPoint> {
        let handles: Vec<(SeriesSelector, Arc<RwLock<Series>>)> = {
            let map = self.series.read().await;
            map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };
        let mut points = Vec::with_capacity(handles.len());
        for (selector, series) in handles {
            let series = series.read().await;
            if let Some(&(timestamp, value)) = series.points.iter().max_by_key(|(ts, _)| *ts) {
                points.push(SeriesPoint {
                    selector,
                    timestamp,
                    value,
                });
            }
        }
        points.sort_by(|a, b| a.selector.cmp(&b.selector));
        points
    }

    /// Number of distinct series seen.
    pub async fn series_count(&self) -> usize {
        self.series.read().await.len()
    }

    /// Drop in-memory samples older than `cutoff`. Returns number dropped.
    ///
    /// The store applies no retention on its own; callers decide.
    pub async fn prune_before(&self, cutoff: Timestamp) -> usize {
        let handles: Vec<Arc<RwLock<Series>>> = {
            let map = self.series.read().await;
            map.values().cloned().collect()
        };
        let mut dropped = 0;
        for series in handles {
            let mut series = series.write().await;
            let before = series.points.len();
            series.points.retain(|(ts, _)| *ts >= cutoff);
            dropped += before - series.points.len();
        }
        if let Some(journal) = &self.journal
            && let Err(e) = journal.prune_samples_before(cutoff)
        {
            tracing::warn!(error = %e, "journal prune failed");
        }
        dropped
    }
}

/// Reduce the samples of one bucket. Empty buckets have no value.
fn aggregate(values: &mut [f64], statistic: Statistic) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let result = match statistic {
        Statistic::Sum => values.iter().sum(),
        Statistic::Avg => values.iter().sum::<f64>() / n,
        Statistic::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Statistic::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Statistic::Count => n,
        Statistic::P95 => percentile(values, 0.95),
        Statistic::P99 => percentile(values, 0.99),
    };
    Some(result)
}

/// Nearest-rank percentile.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (p * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> SeriesSelector {
        SeriesSelector::new("CPUUtilization").with_dimension("ServiceName", "web")
    }

    fn sample(ts: u64, value: f64) -> MetricSample {
        MetricSample::new("CPUUtilization", ts, value).with_dimension("ServiceName", "web")
    }

    #[tokio::test]
    async fn query_buckets_by_period() {
        let store = MetricStore::new();
        store.record(sample(0, 10.0)).await.unwrap();
        store.record(sample(30, 20.0)).await.unwrap();
        store.record(sample(60, 40.0)).await.unwrap();
        store.record(sample(150, 80.0)).await.unwrap();

        let buckets = store
            .query(&cpu(), TimeRange::new(0, 180), 60, Statistic::Avg)
            .await;
        assert_eq!(
            buckets,
            vec![
                Bucket { start: 0, value: Some(15.0) },
                Bucket { start: 60, value: Some(40.0) },
                Bucket { start: 120, value: Some(80.0) },
            ]
        );
    }

    #[tokio::test]
    async fn empty_bucket_has_no_value() {
        let store = MetricStore::new();
        store.record(sample(10, 1.0)).await.unwrap();

        let buckets = store
            .query(&cpu(), TimeRange::new(0, 120), 60, Statistic::Sum)
            .await;
        assert_eq!(buckets[0].value, Some(1.0));
        assert_eq!(buckets[1].value, None);
    }

    #[tokio::test]
    async fn unknown_series_is_all_empty() {
        let store = MetricStore::new();
        let buckets = store
            .query(&SeriesSelector::new("nope"), TimeRange::new(0, 120), 60, Statistic::Sum)
            .await;
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.value.is_none()));
    }

    #[tokio::test]
    async fn dimensions_separate_series() {
        let store = MetricStore::new();
        store.record(sample(10, 1.0)).await.unwrap();
        store
            .record(MetricSample::new("CPUUtilization", 10, 99.0).with_dimension("ServiceName", "api"))
            .await
            .unwrap();

        assert_eq!(store.series_count().await, 2);
        let buckets = store
            .query(&cpu(), TimeRange::new(0, 60), 60, Statistic::Max)
            .await;
        assert_eq!(buckets[0].value, Some(1.0));
    }

    #[tokio::test]
    async fn out_of_order_samples_are_accepted() {
        let store = MetricStore::new();
        store.record(sample(50, 3.0)).await.unwrap();
        store.record(sample(5, 1.0)).await.unwrap();
        store.record(sample(25, 2.0)).await.unwrap();

        let points = store.latest_points().await;
        assert_eq!(points[0].timestamp, 50);
        assert_eq!(points[0].value, 3.0);

        let buckets = store
            .query(&cpu(), TimeRange::new(0, 60), 60, Statistic::Min)
            .await;
        assert_eq!(buckets[0].value, Some(1.0));
    }

    #[tokio::test]
    async fn range_end_is_exclusive() {
        let store = MetricStore::new();
        store.record(sample(60, 5.0)).await.unwrap();
        let buckets = store
            .query(&cpu(), TimeRange::new(0, 60), 60, Statistic::Sum)
            .await;
        assert_eq!(buckets, vec![Bucket { start: 0, value: None }]);
    }

    #[tokio::test]
    async fn statistics() {
        let store = MetricStore::new();
        for (i, v) in (1..=100).enumerate() {
            store.record(sample(i as u64 % 60, v as f64)).await.unwrap();
        }
        let range = TimeRange::new(0, 60);
        let sel = cpu();
        let q = |stat| store.query(&sel, range, 60, stat);
        assert_eq!(q(Statistic::Sum).await[0].value, Some(5050.0));
        assert_eq!(q(Statistic::Avg).await[0].value, Some(50.5));
        assert_eq!(q(Statistic::Min).await[0].value, Some(1.0));
        assert_eq!(q(Statistic::Max).await[0].value, Some(100.0));
        assert_eq!(q(Statistic::Count).await[0].value, Some(100.0));
        assert_eq!(q(Statistic::P95).await[0].value, Some(95.0));
        assert_eq!(q(Statistic::P99).await[0].value, Some(99.0));
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&mut [7.0], 0.99), 7.0);
    }

    #[tokio::test]
    async fn journal_restores_samples() {
        let state = StateStore::open_in_memory().unwrap();
        {
            let store = MetricStore::with_journal(state.clone());
            store
                .record_batch(vec![sample(10, 1.0), sample(20, 2.0)])
                .await
                .unwrap();
        }

        let restored = MetricStore::restore(state).await.unwrap();
        let buckets = restored
            .query(&cpu(), TimeRange::new(0, 60), 60, Statistic::Sum)
            .await;
        assert_eq!(buckets[0].value, Some(3.0));
    }

    #[tokio::test]
    async fn prune_drops_old_samples() {
        let store = MetricStore::new();
        store.record(sample(10, 1.0)).await.unwrap();
        store.record(sample(100, 2.0)).await.unwrap();
        assert_eq!(store.prune_before(50).await, 1);
        let buckets = store
            .query(&cpu(), TimeRange::new(0, 120), 120, Statistic::Count)
            .await;
        assert_eq!(buckets[0].value, Some(1.0));
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers() {
        let store = Arc::new(MetricStore::new());
        let mut handles = Vec::new();
        for w in 0..4u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    store
                        .record(MetricSample::new("req", i, 1.0).with_dimension("w", &w.to_string()))
                        .await
                        .unwrap();
                }
            }));
        }
        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..20 {
                    let _ = store
                        .query(&SeriesSelector::new("req"), TimeRange::new(0, 60), 60, Statistic::Sum)
                        .await;
                }
            })
        };
        for h in handles {
            h.await.unwrap();
        }
        reader.await.unwrap();
        assert_eq!(store.series_count().await, 4);
    }
}
