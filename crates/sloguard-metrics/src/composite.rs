//! Composite metric evaluation.
//!
//! Every raw series referenced by an expression (including those inside
//! nested composites) is queried once, concurrently, with the caller's
//! period. The tree is then folded bucket by bucket.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use sloguard_core::{
    CompositeMetricDefinition, Expr, MetricError, MetricRef, MetricResult, Operator,
    SeriesSelector, Statistic, TimeRange, Timestamp,
};

use crate::store::{Bucket, MetricStore};

/// Value of one period bucket, or why it has none.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketValue {
    pub start: Timestamp,
    pub value: MetricResult<f64>,
}

type SeriesKey = (SeriesSelector, Statistic);

/// Resolves raw and composite metric references against a [`MetricStore`].
#[derive(Clone)]
pub struct CompositeEvaluator {
    store: Arc<MetricStore>,
}

impl CompositeEvaluator {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Evaluate a composite over `range` using its own period.
    pub async fn evaluate(
        &self,
        definition: &CompositeMetricDefinition,
        range: TimeRange,
    ) -> Vec<BucketValue> {
        self.evaluate_expr(&definition.name, &definition.expression, range, definition.period_secs)
            .await
    }

    /// Resolve any metric reference to one value per `period_secs` bucket.
    pub async fn resolve(
        &self,
        metric: &MetricRef,
        range: TimeRange,
        period_secs: u64,
    ) -> Vec<BucketValue> {
        match metric {
            MetricRef::Series(series) => {
                let name = series.selector.series_key();
                self.store
                    .query(&series.selector, range, period_secs, series.statistic)
                    .await
                    .into_iter()
                    .map(|b| BucketValue {
                        start: b.start,
                        value: b.value.ok_or_else(|| MetricError::MissingData {
                            metric: name.clone(),
                            bucket_start: b.start,
                        }),
                    })
                    .collect()
            }
            MetricRef::Composite(def) => {
                self.evaluate_expr(&def.name, &def.expression, range, period_secs)
                    .await
            }
        }
    }

    /// Value of the single period `[now - period, now)`.
    pub async fn resolve_latest(
        &self,
        metric: &MetricRef,
        now: Timestamp,
        period_secs: u64,
    ) -> MetricResult<f64> {
        let range = TimeRange::latest(now, period_secs);
        let buckets = self.resolve(metric, range, period_secs).await;
        match buckets.into_iter().next() {
            Some(bucket) => bucket.value,
            None => Err(MetricError::MissingData {
                metric: metric.describe(),
                bucket_start: range.start,
            }),
        }
    }

    async fn evaluate_expr(
        &self,
        name: &str,
        expr: &Expr,
        range: TimeRange,
        period_secs: u64,
    ) -> Vec<BucketValue> {
        let period = period_secs.max(1);

        let mut keys: Vec<SeriesKey> = Vec::new();
        collect_series(expr, &mut keys);

        let queries = keys.iter().map(|(selector, statistic)| {
            self.store.query(selector, range, period, *statistic)
        });
        let results = join_all(queries).await;
        let columns: HashMap<SeriesKey, Vec<Bucket>> = keys.into_iter().zip(results).collect();

        let bucket_count = range.len_secs().div_ceil(period) as usize;
        (0..bucket_count)
            .map(|idx| {
                let start = range.start + idx as u64 * period;
                BucketValue {
                    start,
                    value: fold(name, expr, idx, start, &columns),
                }
            })
            .collect()
    }
}

fn collect_series(expr: &Expr, out: &mut Vec<SeriesKey>) {
    match expr {
        Expr::Series(s) => {
            let key = (s.selector.clone(), s.statistic);
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Expr::Constant(_) => {}
        Expr::Composite(def) => collect_series(&def.expression, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_series(lhs, out);
            collect_series(rhs, out);
        }
    }
}

fn fold(
    name: &str,
    expr: &Expr,
    idx: usize,
    start: Timestamp,
    columns: &HashMap<SeriesKey, Vec<Bucket>>,
) -> MetricResult<f64> {
    match expr {
        Expr::Constant(c) => Ok(*c),
        Expr::Series(s) => columns
            .get(&(s.selector.clone(), s.statistic))
            .and_then(|col| col.get(idx))
            .and_then(|b| b.value)
            .ok_or_else(|| MetricError::MissingData {
                metric: s.selector.series_key(),
                bucket_start: start,
            }),
        Expr::Composite(def) => fold(&def.name, &def.expression, idx, start, columns),
        Expr::Binary { op, lhs, rhs } => {
            let l = fold(name, lhs, idx, start, columns)?;
            let r = fold(name, rhs, idx, start, columns)?;
            let undefined = || MetricError::UndefinedMetric {
                metric: name.to_string(),
                bucket_start: start,
            };
            let value = match op {
                Operator::Add => l + r,
                Operator::Sub => l - r,
                Operator::Mul => l * r,
                Operator::Div if r == 0.0 => {
                    // No traffic at all is zero errors, not a missing bucket.
                    if l == 0.0 {
                        return Ok(0.0);
                    }
                    return Err(undefined());
                }
                Operator::Div => l / r,
            };
            if value.is_finite() {
                Ok(value)
            } else {
                Err(undefined())
            }
        }
    }
}
