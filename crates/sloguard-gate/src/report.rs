//! SLO compliance report for an environment.
//!
//! Summarises the environment's SLO alarms as SUCCESS, VIOLATION or
//! NO_DATA. An environment is compliant only when every alarm reports
//! SUCCESS.

use serde::{Deserialize, Serialize};

use sloguard_alarm::{AlarmEvaluator, AlarmResult};
use sloguard_core::{AlarmStateValue, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SloStatus {
    Success,
    Violation,
    NoData,
}

impl From<AlarmStateValue> for SloStatus {
    fn from(state: AlarmStateValue) -> Self {
        match state {
            AlarmStateValue::Ok => SloStatus::Success,
            AlarmStateValue::Alarm => SloStatus::Violation,
            AlarmStateValue::InsufficientData => SloStatus::NoData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloCheck {
    pub alarm: String,
    pub status: SloStatus,
    pub value: Option<f64>,
    pub threshold: f64,
    pub compliant: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloReport {
    pub environment: String,
    pub generated_at: Timestamp,
    pub checks: Vec<SloCheck>,
    pub overall_compliant: bool,
}

impl SloReport {
    /// Build the report from the current state of `alarm_names`.
    pub async fn build(
        environment: &str,
        alarm_names: &[String],
        alarms: &AlarmEvaluator,
        now: Timestamp,
    ) -> AlarmResult<Self> {
        let mut checks = Vec::with_capacity(alarm_names.len());
        for name in alarm_names {
            let spec = alarms.spec(name).await?;
            let state = alarms.state(name).await?;
            let status = SloStatus::from(state.current_state);
            let message = match (status, state.last_value) {
                (SloStatus::NoData, _) | (_, None) => format!("{name}: no data available"),
                (_, Some(v)) => format!(
                    "{name}: {v:.4} (threshold {} {})",
                    spec.comparison.symbol(),
                    spec.threshold
                ),
            };
            checks.push(SloCheck {
                alarm: name.clone(),
                status,
                value: state.last_value,
                threshold: spec.threshold,
                compliant: status == SloStatus::Success,
                message,
            });
        }
        let overall_compliant = checks.iter().all(|c| c.compliant);
        Ok(Self {
            environment: environment.to_string(),
            generated_at: now,
            checks,
            overall_compliant,
        })
    }

    pub fn violations(&self) -> impl Iterator<Item = &SloCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == SloStatus::Violation)
    }
}
