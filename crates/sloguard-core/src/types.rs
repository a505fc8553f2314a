//! Domain types for the SloGuard control plane.
//!
//! Series selectors, metric references, alarm specs, scaling policies and
//! environment policies. Everything that crosses a crate boundary or the
//! config file is serializable.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

// ── Series ────────────────────────────────────────────────────────

/// Identity of a time series: metric name plus its dimension set.
///
/// Dimensions live in a `BTreeMap` so two selectors built with the same
/// pairs in a different order name the same series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesSelector {
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl SeriesSelector {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Stable textual key, e.g. `RequestCount{LoadBalancer=web}`.
    pub fn series_key(&self) -> String {
        if self.dimensions.is_empty() {
            return self.metric_name.clone();
        }
        let dims: Vec<String> = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}{{{}}}", self.metric_name, dims.join(","))
    }
}

impl fmt::Display for SeriesSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.series_key())
    }
}

/// Aggregation applied to the samples of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Avg,
    Sum,
    Min,
    Max,
    P95,
    P99,
    Count,
}

/// Half-open time range `[start, end)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// The single most recent period ending at `now`.
    pub fn latest(now: Timestamp, period_secs: u64) -> Self {
        Self {
            start: now.saturating_sub(period_secs),
            end: now,
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn len_secs(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// A raw series plus the statistic to read it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRef {
    #[serde(flatten)]
    pub selector: SeriesSelector,
    pub statistic: Statistic,
}

impl SeriesRef {
    pub fn new(selector: SeriesSelector, statistic: Statistic) -> Self {
        Self { selector, statistic }
    }
}

// ── Composite metrics ─────────────────────────────────────────────

/// Arithmetic operator in a composite expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
        }
    }
}

/// Expression tree of a composite metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Series(SeriesRef),
    Constant(f64),
    /// A nested composite, evaluated recursively with the caller's period.
    Composite(Box<CompositeMetricDefinition>),
    Binary {
        op: Operator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: Operator, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Series(s) => write!(f, "{}:{:?}", s.selector, s.statistic),
            Expr::Constant(c) => write!(f, "{c}"),
            Expr::Composite(c) => f.write_str(&c.name),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

/// A derived metric: an expression over other series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMetricDefinition {
    pub name: String,
    pub expression: Expr,
    /// Bucket width when evaluated on its own.
    pub period_secs: u64,
}

/// What an alarm or scaling policy watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRef {
    Series(SeriesRef),
    Composite(CompositeMetricDefinition),
}

impl MetricRef {
    /// Human-readable name for logs.
    pub fn describe(&self) -> String {
        match self {
            MetricRef::Series(s) => format!("{}:{:?}", s.selector, s.statistic),
            MetricRef::Composite(c) => c.name.clone(),
        }
    }
}

// ── Alarms ────────────────────────────────────────────────────────

/// Threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">", alias = "GreaterThanThreshold")]
    GreaterThan,
    #[serde(rename = "<", alias = "LessThanThreshold")]
    LessThan,
    #[serde(rename = ">=", alias = "GreaterThanOrEqualToThreshold")]
    GreaterThanOrEqual,
    #[serde(rename = "<=", alias = "LessThanOrEqualToThreshold")]
    LessThanOrEqual,
}

impl Comparison {
    /// Whether `value` breaches `threshold` under this comparison.
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::GreaterThanOrEqual => value >= threshold,
            Comparison::LessThanOrEqual => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::GreaterThanOrEqual => ">=",
            Comparison::LessThanOrEqual => "<=",
        }
    }
}

/// How a tick with no data is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreatMissingData {
    Breaching,
    NotBreaching,
    Ignore,
    #[default]
    Missing,
}

/// Externally visible alarm state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStateValue {
    #[default]
    Ok,
    Alarm,
    InsufficientData,
}

impl fmt::Display for AlarmStateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlarmStateValue::Ok => "OK",
            AlarmStateValue::Alarm => "ALARM",
            AlarmStateValue::InsufficientData => "INSUFFICIENT_DATA",
        })
    }
}

/// Definition of a single SLO alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSpec {
    pub name: String,
    pub metric: MetricRef,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Consecutive breaching periods required to enter ALARM.
    pub evaluation_periods: u32,
    pub period_secs: u64,
    #[serde(default)]
    pub treat_missing_data: TreatMissingData,
}

impl AlarmSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_periods < 1 {
            return Err(ConfigError::Invalid(format!(
                "alarm {}: evaluation_periods must be >= 1",
                self.name
            )));
        }
        if self.period_secs < 1 {
            return Err(ConfigError::Invalid(format!(
                "alarm {}: period must be at least one second",
                self.name
            )));
        }
        if !self.threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "alarm {}: threshold must be finite",
                self.name
            )));
        }
        Ok(())
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// What a predictive policy may do when its forecast exceeds max capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaxCapacityBreachBehavior {
    #[default]
    HonorMaxCapacity,
    IncreaseMaxCapacity,
}

/// A policy attached to a scalable target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingPolicy {
    TargetTracking {
        name: String,
        metric: MetricRef,
        target_value: f64,
        scale_in_cooldown_secs: u64,
        scale_out_cooldown_secs: u64,
    },
    Scheduled {
        name: String,
        cron_expr: String,
        /// How long after each cron match the override stays active.
        window_secs: u64,
        min_capacity: u32,
        max_capacity: u32,
    },
    Predictive {
        name: String,
        target_metric: MetricRef,
        target_value: f64,
        buffer_time_secs: u64,
        max_capacity_buffer: u32,
        max_capacity_breach_behavior: MaxCapacityBreachBehavior,
    },
}

impl ScalingPolicy {
    pub fn name(&self) -> &str {
        match self {
            ScalingPolicy::TargetTracking { name, .. }
            | ScalingPolicy::Scheduled { name, .. }
            | ScalingPolicy::Predictive { name, .. } => name,
        }
    }
}

/// Static description of a scalable resource and its policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalableTargetSpec {
    pub resource_id: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub initial_capacity: u32,
    pub policies: Vec<ScalingPolicy>,
}

impl ScalableTargetSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_capacity > self.max_capacity {
            return Err(ConfigError::Invalid(format!(
                "target {}: min_capacity {} exceeds max_capacity {}",
                self.resource_id, self.min_capacity, self.max_capacity
            )));
        }
        for policy in &self.policies {
            match policy {
                ScalingPolicy::TargetTracking { name, target_value, .. }
                | ScalingPolicy::Predictive { name, target_value, .. }
                    if *target_value <= 0.0 || !target_value.is_finite() =>
                {
                    return Err(ConfigError::Invalid(format!(
                        "target {}: policy {name} needs a positive target_value",
                        self.resource_id
                    )));
                }
                ScalingPolicy::Scheduled {
                    name,
                    min_capacity,
                    max_capacity,
                    ..
                } if min_capacity > max_capacity => {
                    return Err(ConfigError::Invalid(format!(
                        "target {}: scheduled policy {name} has min > max",
                        self.resource_id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ── Releases ──────────────────────────────────────────────────────

/// Risk classification of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Default tier for a conventional environment name.
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "prod" | "production" => RiskTier::High,
            "staging" | "stage" | "preprod" => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }
}

/// Safety policy applied by the deployment gate to one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentPolicy {
    pub name: String,
    pub risk_tier: RiskTier,
    /// Roll back automatically when verification fails.
    pub circuit_breaker: bool,
    /// Target passed to the readiness probe.
    pub health_target: String,
    /// SLO alarms watched during the post-deploy window.
    pub slo_alarms: Vec<String>,
    pub confirmation_timeout: Duration,
    pub apply_timeout: Duration,
    pub probe_timeout: Duration,
    pub verify_interval: Duration,
    pub verify_attempts: u32,
    pub alarm_window: Duration,
}

impl EnvironmentPolicy {
    /// A policy with the stock timeouts for `name`.
    pub fn new(name: &str, health_target: &str) -> Self {
        Self {
            name: name.to_string(),
            risk_tier: RiskTier::for_environment(name),
            circuit_breaker: true,
            health_target: health_target.to_string(),
            slo_alarms: Vec::new(),
            confirmation_timeout: Duration::from_secs(15 * 60),
            apply_timeout: Duration::from_secs(30 * 60),
            probe_timeout: Duration::from_secs(5),
            verify_interval: Duration::from_secs(10),
            verify_attempts: 30,
            alarm_window: Duration::from_secs(5 * 60),
        }
    }
}
