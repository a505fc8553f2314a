//! Persisted records of the SloGuard control plane.
//!
//! Metric samples and deployment records are append-only; alarm state is
//! the one record rewritten in place on every evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sloguard_core::{AlarmStateValue, RiskTier, SeriesSelector, Timestamp};

// ── Metrics ───────────────────────────────────────────────────────

/// One observation of a dimensioned series. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub timestamp: Timestamp,
    pub value: f64,
}

impl MetricSample {
    pub fn new(metric_name: &str, timestamp: Timestamp, value: f64) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            dimensions: BTreeMap::new(),
            timestamp,
            value,
        }
    }

    pub fn with_dimension(mut self, key: &str, value: &str) -> Self {
        self.dimensions.insert(key.to_string(), value.to_string());
        self
    }

    /// The series this sample belongs to.
    pub fn selector(&self) -> SeriesSelector {
        SeriesSelector {
            metric_name: self.metric_name.clone(),
            dimensions: self.dimensions.clone(),
        }
    }
}

// ── Alarms ────────────────────────────────────────────────────────

/// Mutable evaluation state of one alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmState {
    pub alarm_name: String,
    pub current_state: AlarmStateValue,
    pub consecutive_breaching_periods: u32,
    /// Unix timestamp of the last state change, if any.
    pub last_transition_time: Option<Timestamp>,
    /// End of the most recent evaluated period.
    pub last_evaluated_time: Option<Timestamp>,
    /// Value resolved on the most recent tick that had data.
    pub last_value: Option<f64>,
}

impl AlarmState {
    /// Fresh state: OK with no history.
    pub fn new(alarm_name: &str) -> Self {
        Self {
            alarm_name: alarm_name.to_string(),
            current_state: AlarmStateValue::Ok,
            consecutive_breaching_periods: 0,
            last_transition_time: None,
            last_evaluated_time: None,
            last_value: None,
        }
    }

    /// Build the key for the alarm states table.
    pub fn table_key(&self) -> String {
        self.alarm_name.clone()
    }
}

// ── Deployments ───────────────────────────────────────────────────

/// Terminal outcome of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Success,
    RolledBack,
    Failed,
    /// Confirmation never arrived or the operator cancelled.
    Cancelled,
}

/// Result of one post-deploy check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    /// e.g. `health_probe` or `alarm:latency-slo`.
    pub check: String,
    pub passed: bool,
    pub detail: String,
}

impl VerificationResult {
    pub fn pass(check: &str, detail: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(check: &str, detail: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Append-only audit entry for one deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: String,
    pub environment: String,
    pub timestamp: Timestamp,
    pub outcome: DeploymentOutcome,
    pub risk_tier: RiskTier,
    pub change_count: usize,
    pub verification_results: Vec<VerificationResult>,
    pub rollback_issued: bool,
    /// Failure or cancellation reason.
    pub error: Option<String>,
}

impl DeploymentRecord {
    /// Build the composite key for the deployment records table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}:{}", self.environment, self.timestamp, self.id)
    }
}
