//! Autoscaling controller for a single scalable target.
//!
//! Every tick collects one proposal per policy, resolves them max-wins,
//! applies the per-direction cooldowns and, when the outcome differs from
//! the current capacity, calls the runtime's `apply_capacity`. The whole
//! tick holds the target lock, so capacity has a single writer; policy
//! metric reads inside the tick run concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sloguard_core::{
    ActuationError, MaxCapacityBreachBehavior, ScalableTargetSpec, ScalingPolicy, Timestamp,
};
use sloguard_metrics::CompositeEvaluator;

use crate::error::{ScalingError, ScalingResult};
use crate::policy::{Bounds, Proposal, cooldowns, metric_period, proportional_capacity};
use crate::schedule::CronSchedule;

/// Runtime call that changes the capacity of a resource.
#[async_trait]
pub trait CapacityActuator: Send + Sync {
    async fn apply_capacity(&self, resource_id: &str, desired: u32) -> Result<(), ActuationError>;
}

/// Mutable state of one scalable resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalableTarget {
    pub resource_id: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub current_capacity: u32,
    pub last_scale_in_time: Option<Timestamp>,
    pub last_scale_out_time: Option<Timestamp>,
}

/// Outcome of one controller tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Capacity was changed.
    ScaleTo(u32),
    /// A change was wanted but the direction is cooling down.
    Suppressed { desired: u32 },
    NoChange,
}

pub struct ScalingController {
    spec: ScalableTargetSpec,
    /// Compiled schedules, keyed by policy name.
    schedules: BTreeMap<String, CronSchedule>,
    scale_in_cooldown: u64,
    scale_out_cooldown: u64,
    target: Mutex<ScalableTarget>,
    /// Client-supplied forecast points for predictive policies.
    forecasts: Mutex<BTreeMap<Timestamp, f64>>,
    metrics: CompositeEvaluator,
    actuator: Arc<dyn CapacityActuator>,
}

impl ScalingController {
    /// Build a controller; fails on inconsistent bounds or a bad cron.
    pub fn new(
        spec: ScalableTargetSpec,
        metrics: CompositeEvaluator,
        actuator: Arc<dyn CapacityActuator>,
    ) -> ScalingResult<Self> {
        spec.validate()?;
        let mut schedules = BTreeMap::new();
        for policy in &spec.policies {
            if let ScalingPolicy::Scheduled { name, cron_expr, .. } = policy {
                schedules.insert(name.clone(), CronSchedule::parse(cron_expr)?);
            }
        }
        let (scale_in_cooldown, scale_out_cooldown) = cooldowns(&spec.policies);
        let target = ScalableTarget {
            resource_id: spec.resource_id.clone(),
            min_capacity: spec.min_capacity,
            max_capacity: spec.max_capacity,
            current_capacity: spec
                .initial_capacity
                .clamp(spec.min_capacity, spec.max_capacity),
            last_scale_in_time: None,
            last_scale_out_time: None,
        };

        Ok(Self {
            spec,
            schedules,
            scale_in_cooldown,
            scale_out_cooldown,
            target: Mutex::new(target),
            forecasts: Mutex::new(BTreeMap::new()),
            metrics,
            actuator,
        })
    }

    pub fn resource_id(&self) -> &str {
        &self.spec.resource_id
    }

    pub fn spec(&self) -> &ScalableTargetSpec {
        &self.spec
    }

    pub async fn snapshot(&self) -> ScalableTarget {
        self.target.lock().await.clone()
    }

    pub async fn current_capacity(&self) -> u32 {
        self.target.lock().await.current_capacity
    }

    /// Record a forecast value for the time `at`. Later submissions for the
    /// same instant replace earlier ones.
    pub async fn submit_forecast(&self, at: Timestamp, value: f64) {
        self.forecasts.lock().await.insert(at, value);
    }

    /// Latest forecast point at or before `horizon`. Older points are
    /// dropped.
    async fn forecast_for(&self, horizon: Timestamp) -> Option<f64> {
        let mut forecasts = self.forecasts.lock().await;
        let (&at, &value) = forecasts.range(..=horizon).next_back()?;
        *forecasts = forecasts.split_off(&at);
        Some(value)
    }

    /// Run one control-loop tick at `now`.
    pub async fn tick(&self, now: Timestamp) -> ScalingResult<ScaleDecision> {
        let mut target = self.target.lock().await;
        let current = target.current_capacity;

        let mut proposals = Vec::new();
        let bounds = self.tick_bounds(now, current, &mut proposals);

        for result in self.policy_proposals(now, current, bounds).await {
            match result {
                Ok(p) => proposals.push(p),
                Err(e) => warn!(resource_id = %self.spec.resource_id, error = %e, "policy evaluation failed"),
            }
        }

        let Some(desired) = proposals.iter().map(|p| p.desired).max() else {
            debug!(resource_id = %self.spec.resource_id, "no policy proposals");
            return Ok(ScaleDecision::NoChange);
        };
        debug!(resource_id = %self.spec.resource_id, ?proposals, desired, current, "proposals resolved");

        if desired == current {
            return Ok(ScaleDecision::NoChange);
        }

        let scale_out = desired > current;
        let (last, cooldown) = if scale_out {
            (target.last_scale_out_time, self.scale_out_cooldown)
        } else {
            (target.last_scale_in_time, self.scale_in_cooldown)
        };
        if last.is_some_and(|t| now.saturating_sub(t) < cooldown) {
            debug!(
                resource_id = %self.spec.resource_id,
                desired,
                current,
                direction = if scale_out { "out" } else { "in" },
                "scaling suppressed by cooldown"
            );
            return Ok(ScaleDecision::Suppressed { desired });
        }

        if let Err(e) = self
            .actuator
            .apply_capacity(&self.spec.resource_id, desired)
            .await
        {
            warn!(resource_id = %self.spec.resource_id, desired, error = %e, "apply_capacity failed");
            return Err(e.into());
        }

        target.current_capacity = desired;
        if scale_out {
            target.last_scale_out_time = Some(now);
        } else {
            target.last_scale_in_time = Some(now);
        }
        info!(
            resource_id = %self.spec.resource_id,
            from = current,
            to = desired,
            "capacity changed"
        );
        Ok(ScaleDecision::ScaleTo(desired))
    }

    /// Bounds for this tick. Active scheduled policies override the
    /// target's bounds and each proposes the current capacity clamped into
    /// its own range.
    fn tick_bounds(&self, now: Timestamp, current: u32, proposals: &mut Vec<Proposal>) -> Bounds {
        let mut active: Option<Bounds> = None;
        for policy in &self.spec.policies {
            let ScalingPolicy::Scheduled {
                name,
                window_secs,
                min_capacity,
                max_capacity,
                ..
            } = policy
            else {
                continue;
            };
            let Some(schedule) = self.schedules.get(name) else {
                continue;
            };
            if !schedule.active_at(now, *window_secs) {
                continue;
            }

            let own = Bounds {
                min: *min_capacity,
                max: *max_capacity,
            };
            debug!(resource_id = %self.spec.resource_id, policy = %name, min = own.min, max = own.max, "scheduled bounds active");
            proposals.push(Proposal {
                policy: name.clone(),
                desired: own.clamp(current),
            });
            active = Some(match active {
                Some(b) => Bounds {
                    min: b.min.max(own.min),
                    max: b.max.max(own.max),
                },
                None => own,
            });
        }

        active.unwrap_or(Bounds {
            min: self.spec.min_capacity,
            max: self.spec.max_capacity,
        })
    }

    async fn policy_proposals(
        &self,
        now: Timestamp,
        current: u32,
        bounds: Bounds,
    ) -> Vec<ScalingResult<Proposal>> {
        let evaluations = self
            .spec
            .policies
            .iter()
            .map(|policy| self.evaluate_policy(policy, now, current, bounds));
        join_all(evaluations).await.into_iter().flatten().collect()
    }

    /// Proposal of a metric-driven policy; `None` for scheduled policies,
    /// which are handled by [`tick_bounds`](Self::tick_bounds).
    async fn evaluate_policy(
        &self,
        policy: &ScalingPolicy,
        now: Timestamp,
        current: u32,
        bounds: Bounds,
    ) -> Option<ScalingResult<Proposal>> {
        match policy {
            ScalingPolicy::TargetTracking {
                name,
                metric,
                target_value,
                ..
            } => {
                let result = match self
                    .metrics
                    .resolve_latest(metric, now, metric_period(metric))
                    .await
                {
                    Ok(value) => proposal(name, current, value, *target_value, bounds.min, bounds.max),
                    Err(e) => Err(ScalingError::PolicyEvaluation {
                        policy: name.clone(),
                        reason: e.to_string(),
                    }),
                };
                Some(result)
            }
            ScalingPolicy::Predictive {
                name,
                target_value,
                buffer_time_secs,
                max_capacity_buffer,
                max_capacity_breach_behavior,
                ..
            } => {
                let horizon = now.saturating_add(*buffer_time_secs);
                let upper = match max_capacity_breach_behavior {
                    MaxCapacityBreachBehavior::HonorMaxCapacity => bounds.max,
                    MaxCapacityBreachBehavior::IncreaseMaxCapacity => {
                        bounds.max.saturating_add(*max_capacity_buffer)
                    }
                };
                let result = match self.forecast_for(horizon).await {
                    Some(forecast) => proposal(name, current, forecast, *target_value, bounds.min, upper),
                    None => Err(ScalingError::PolicyEvaluation {
                        policy: name.clone(),
                        reason: format!("no forecast at or before {horizon}"),
                    }),
                };
                Some(result)
            }
            ScalingPolicy::Scheduled { .. } => None,
        }
    }
}

fn proposal(
    policy: &str,
    current: u32,
    value: f64,
    target_value: f64,
    min: u32,
    max: u32,
) -> ScalingResult<Proposal> {
    let desired = proportional_capacity(current, value, target_value).ok_or_else(|| {
        ScalingError::PolicyEvaluation {
            policy: policy.to_string(),
            reason: format!("unusable value {value}"),
        }
    })?;
    Ok(Proposal {
        policy: policy.to_string(),
        desired: desired.clamp(min, max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sloguard_core::{MetricRef, SeriesRef, SeriesSelector, Statistic};
    use sloguard_metrics::MetricStore;
    use sloguard_state::MetricSample;

    #[derive(Default)]
    struct RecordingActuator {
        calls: std::sync::Mutex<Vec<(String, u32)>>,
        fail: bool,
    }

    #[async_trait]
    impl CapacityActuator for RecordingActuator {
        async fn apply_capacity(&self, resource_id: &str, desired: u32) -> Result<(), ActuationError> {
            if self.fail {
                return Err(ActuationError::new(resource_id, "service update rejected"));
            }
            self.calls
                .lock()
                .unwrap()
                .push((resource_id.to_string(), desired));
            Ok(())
        }
    }

    fn cpu_metric() -> MetricRef {
        MetricRef::Series(SeriesRef::new(
            SeriesSelector::new("CPUUtilization").with_dimension("ServiceName", "web"),
            Statistic::Avg,
        ))
    }

    fn cpu_policy(name: &str, target: f64) -> ScalingPolicy {
        ScalingPolicy::TargetTracking {
            name: name.to_string(),
            metric: cpu_metric(),
            target_value: target,
            scale_in_cooldown_secs: 300,
            scale_out_cooldown_secs: 300,
        }
    }

    fn spec(policies: Vec<ScalingPolicy>) -> ScalableTargetSpec {
        ScalableTargetSpec {
            resource_id: "service/web".to_string(),
            min_capacity: 1,
            max_capacity: 10,
            initial_capacity: 4,
            policies,
        }
    }

    async fn cpu(store: &MetricStore, ts: u64, value: f64) {
        store
            .record(MetricSample::new("CPUUtilization", ts, value).with_dimension("ServiceName", "web"))
            .await
            .unwrap();
    }

    fn controller(
        store: &Arc<MetricStore>,
        policies: Vec<ScalingPolicy>,
        actuator: Arc<RecordingActuator>,
    ) -> ScalingController {
        ScalingController::new(spec(policies), CompositeEvaluator::new(store.clone()), actuator).unwrap()
    }

    #[tokio::test]
    async fn target_tracking_scales_out() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 91.0).await;
        let actuator = Arc::new(RecordingActuator::default());
        let c = controller(&store, vec![cpu_policy("cpu", 70.0)], actuator.clone());

        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(5));
        assert_eq!(c.current_capacity().await, 5);
        assert_eq!(
            *actuator.calls.lock().unwrap(),
            vec![("service/web".to_string(), 5)]
        );
        assert_eq!(c.snapshot().await.last_scale_out_time, Some(1000));
    }

    #[tokio::test]
    async fn scale_out_cooldown_suppresses() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 91.0).await;
        let actuator = Arc::new(RecordingActuator::default());
        let c = controller(&store, vec![cpu_policy("cpu", 70.0)], actuator.clone());
        c.target.lock().await.last_scale_out_time = Some(940);

        assert_eq!(
            c.tick(1000).await.unwrap(),
            ScaleDecision::Suppressed { desired: 5 }
        );
        assert_eq!(c.current_capacity().await, 4);
        assert!(actuator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldowns_are_per_direction() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 20.0).await;
        let actuator = Arc::new(RecordingActuator::default());
        let c = controller(&store, vec![cpu_policy("cpu", 70.0)], actuator.clone());
        // Recent scale-out does not block a scale-in.
        c.target.lock().await.last_scale_out_time = Some(990);

        // round(4 * 20 / 70) = 1
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(1));
        assert_eq!(c.snapshot().await.last_scale_in_time, Some(1000));
    }

    #[tokio::test]
    async fn max_proposal_wins() {
        let store = Arc::new(MetricStore::new());
        // 4 * 105 / 70 = 6 ; 4 * 157.5 / 70 = 9
        cpu(&store, 950, 105.0).await;
        store
            .record(MetricSample::new("RequestCountPerTarget", 950, 157.5))
            .await
            .unwrap();
        let requests = ScalingPolicy::TargetTracking {
            name: "requests".to_string(),
            metric: MetricRef::Series(SeriesRef::new(
                SeriesSelector::new("RequestCountPerTarget"),
                Statistic::Avg,
            )),
            target_value: 70.0,
            scale_in_cooldown_secs: 0,
            scale_out_cooldown_secs: 0,
        };
        let actuator = Arc::new(RecordingActuator::default());
        let c = controller(&store, vec![cpu_policy("cpu", 70.0), requests], actuator);

        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(9));
    }

    #[tokio::test]
    async fn failing_policy_does_not_block_others() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 91.0).await;
        let broken = ScalingPolicy::TargetTracking {
            name: "unconfigured".to_string(),
            metric: MetricRef::Series(SeriesRef::new(SeriesSelector::new("Nope"), Statistic::Avg)),
            target_value: 50.0,
            scale_in_cooldown_secs: 0,
            scale_out_cooldown_secs: 0,
        };
        let actuator = Arc::new(RecordingActuator::default());
        let c = controller(&store, vec![broken, cpu_policy("cpu", 70.0)], actuator);

        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(5));
    }

    #[tokio::test]
    async fn clamped_to_max() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 1000.0).await;
        let c = controller(
            &store,
            vec![cpu_policy("cpu", 70.0)],
            Arc::new(RecordingActuator::default()),
        );
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(10));
    }

    #[tokio::test]
    async fn actuation_failure_keeps_capacity() {
        let store = Arc::new(MetricStore::new());
        cpu(&store, 950, 91.0).await;
        let actuator = Arc::new(RecordingActuator {
            fail: true,
            ..Default::default()
        });
        let c = controller(&store, vec![cpu_policy("cpu", 70.0)], actuator);

        assert!(matches!(c.tick(1000).await, Err(ScalingError::Actuation(_))));
        let target = c.snapshot().await;
        assert_eq!(target.current_capacity, 4);
        assert_eq!(target.last_scale_out_time, None);
    }

    #[tokio::test]
    async fn no_data_no_change() {
        let store = Arc::new(MetricStore::new());
        let c = controller(
            &store,
            vec![cpu_policy("cpu", 70.0)],
            Arc::new(RecordingActuator::default()),
        );
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::NoChange);
    }

    fn business_hours(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy::Scheduled {
            name: "business-hours".to_string(),
            cron_expr: "0 9 * * *".to_string(),
            window_secs: 8 * 3600,
            min_capacity: min,
            max_capacity: max,
        }
    }

    fn nine_am() -> u64 {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap().timestamp() as u64
    }

    #[tokio::test]
    async fn scheduled_raises_floor_for_this_tick() {
        let store = Arc::new(MetricStore::new());
        let now = nine_am() + 600;
        cpu(&store, now - 30, 35.0).await; // 4 * 35 / 70 = 2
        let c = controller(
            &store,
            vec![cpu_policy("cpu", 70.0), business_hours(6, 20)],
            Arc::new(RecordingActuator::default()),
        );

        assert_eq!(c.tick(now).await.unwrap(), ScaleDecision::ScaleTo(6));
        // Bounds of the target itself are untouched.
        let target = c.snapshot().await;
        assert_eq!((target.min_capacity, target.max_capacity), (1, 10));
    }

    #[tokio::test]
    async fn scheduled_raises_ceiling() {
        let store = Arc::new(MetricStore::new());
        let now = nine_am() + 600;
        cpu(&store, now - 30, 280.0).await; // 4 * 280 / 70 = 16
        let c = controller(
            &store,
            vec![cpu_policy("cpu", 70.0), business_hours(2, 20)],
            Arc::new(RecordingActuator::default()),
        );
        assert_eq!(c.tick(now).await.unwrap(), ScaleDecision::ScaleTo(16));
    }

    #[tokio::test]
    async fn scheduled_inactive_outside_window() {
        let store = Arc::new(MetricStore::new());
        let now = nine_am() - 600;
        let c = controller(
            &store,
            vec![business_hours(6, 20)],
            Arc::new(RecordingActuator::default()),
        );
        assert_eq!(c.tick(now).await.unwrap(), ScaleDecision::NoChange);
    }

    #[test]
    fn bad_cron_rejected() {
        let store = Arc::new(MetricStore::new());
        let policy = ScalingPolicy::Scheduled {
            name: "bad".to_string(),
            cron_expr: "every day".to_string(),
            window_secs: 60,
            min_capacity: 1,
            max_capacity: 2,
        };
        let result = ScalingController::new(
            spec(vec![policy]),
            CompositeEvaluator::new(store),
            Arc::new(RecordingActuator::default()),
        );
        assert!(matches!(result, Err(ScalingError::Cron { .. })));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let store = Arc::new(MetricStore::new());
        let mut inverted = spec(vec![cpu_policy("cpu", 70.0)]);
        inverted.min_capacity = 8;
        inverted.max_capacity = 2;
        let result = ScalingController::new(
            inverted,
            CompositeEvaluator::new(store.clone()),
            Arc::new(RecordingActuator::default()),
        );
        assert!(matches!(result, Err(ScalingError::InvalidTarget(_))));

        let window = ScalingPolicy::Scheduled {
            name: "inverted".to_string(),
            cron_expr: "0 9 * * *".to_string(),
            window_secs: 3600,
            min_capacity: 6,
            max_capacity: 3,
        };
        let result = ScalingController::new(
            spec(vec![window]),
            CompositeEvaluator::new(store),
            Arc::new(RecordingActuator::default()),
        );
        assert!(matches!(result, Err(ScalingError::InvalidTarget(_))));
    }

    fn predictive(behavior: MaxCapacityBreachBehavior) -> ScalingPolicy {
        ScalingPolicy::Predictive {
            name: "forecast".to_string(),
            target_metric: cpu_metric(),
            target_value: 50.0,
            buffer_time_secs: 300,
            max_capacity_buffer: 5,
            max_capacity_breach_behavior: behavior,
        }
    }

    #[tokio::test]
    async fn predictive_uses_forecast_at_horizon() {
        let store = Arc::new(MetricStore::new());
        let c = controller(
            &store,
            vec![predictive(MaxCapacityBreachBehavior::HonorMaxCapacity)],
            Arc::new(RecordingActuator::default()),
        );
        c.submit_forecast(1200, 100.0).await; // 4 * 100 / 50 = 8
        c.submit_forecast(1500, 500.0).await; // beyond horizon

        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(8));
    }

    #[tokio::test]
    async fn predictive_honors_max() {
        let store = Arc::new(MetricStore::new());
        let c = controller(
            &store,
            vec![predictive(MaxCapacityBreachBehavior::HonorMaxCapacity)],
            Arc::new(RecordingActuator::default()),
        );
        c.submit_forecast(1300, 200.0).await; // 16
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(10));
    }

    #[tokio::test]
    async fn predictive_may_exceed_max_by_buffer() {
        let store = Arc::new(MetricStore::new());
        let c = controller(
            &store,
            vec![predictive(MaxCapacityBreachBehavior::IncreaseMaxCapacity)],
            Arc::new(RecordingActuator::default()),
        );
        c.submit_forecast(1300, 200.0).await; // 16, capped at 10 + 5
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::ScaleTo(15));
    }

    #[tokio::test]
    async fn predictive_without_forecast_contributes_nothing() {
        let store = Arc::new(MetricStore::new());
        let c = controller(
            &store,
            vec![predictive(MaxCapacityBreachBehavior::HonorMaxCapacity)],
            Arc::new(RecordingActuator::default()),
        );
        c.submit_forecast(2000, 200.0).await;
        assert_eq!(c.tick(1000).await.unwrap(), ScaleDecision::NoChange);
    }
}
