//! Control plane assembly.
//!
//! Wires the metric store, alarm evaluator, scaling registry and deployment
//! gate together from a [`ControlConfig`], and owns their background loops.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use sloguard_alarm::AlarmEvaluator;
use sloguard_api::{ApiState, build_router};
use sloguard_autoscale::{CapacityActuator, ScalingRegistry};
use sloguard_core::ControlConfig;
use sloguard_gate::{DeploymentGate, ReleaseActuator};
use sloguard_health::HealthProbe;
use sloguard_metrics::{CompositeEvaluator, MetricStore};
use sloguard_notify::{LogSink, Notifier};
use sloguard_state::StateStore;

pub struct ControlPlane {
    pub state: StateStore,
    pub metrics: Arc<MetricStore>,
    pub notifier: Notifier,
    pub alarms: Arc<AlarmEvaluator>,
    pub scaling: Arc<ScalingRegistry>,
    pub gate: Arc<DeploymentGate>,
    alarm_interval: Duration,
    autoscale_interval: Duration,
}

impl ControlPlane {
    /// Build every subsystem from `config`. `runtime` applies capacity
    /// changes and releases; `probe` answers readiness checks.
    pub async fn assemble<R>(
        config: &ControlConfig,
        state: StateStore,
        runtime: Arc<R>,
        probe: Arc<dyn HealthProbe>,
    ) -> anyhow::Result<Self>
    where
        R: CapacityActuator + ReleaseActuator + 'static,
    {
        config.validate()?;

        let metrics = if config.control.journal_metrics {
            let store = MetricStore::restore(state.clone()).await?;
            info!(series = store.series_count().await, "metric journal replayed");
            store
        } else {
            MetricStore::new()
        };
        let metrics = Arc::new(metrics);
        let evaluator = CompositeEvaluator::new(metrics.clone());

        let notifier = Notifier::new();
        notifier.add_sink(Arc::new(LogSink)).await;

        let alarms = AlarmEvaluator::new(config.alarm_specs()?, evaluator.clone(), notifier.clone())
            .with_state(state.clone())
            .await?;
        info!(alarms = alarms.names().len(), "alarm evaluator initialized");

        let scaling = ScalingRegistry::from_specs(
            config.scalable_targets()?,
            evaluator,
            runtime.clone() as Arc<dyn CapacityActuator>,
        )?;
        info!(targets = scaling.len(), "scaling registry initialized");

        let alarms = Arc::new(alarms);
        let gate = DeploymentGate::new(
            runtime as Arc<dyn ReleaseActuator>,
            probe,
            alarms.clone(),
            notifier.clone(),
            state.clone(),
        )
        .with_environments(config.environment_policies()?);
        info!(environments = ?gate.environment_names(), "deployment gate initialized");

        Ok(Self {
            state,
            metrics,
            notifier,
            alarms,
            scaling: Arc::new(scaling),
            gate: Arc::new(gate),
            alarm_interval: config.alarm_interval()?,
            autoscale_interval: config.autoscale_interval()?,
        })
    }

    pub fn router(&self) -> Router {
        build_router(ApiState {
            metrics: self.metrics.clone(),
            alarms: self.alarms.clone(),
            scaling: self.scaling.clone(),
            gate: self.gate.clone(),
        })
    }

    /// Start the alarm and autoscaling loops; both stop when `shutdown`
    /// flips.
    pub fn spawn_loops(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let alarms = self.alarms.clone();
        let alarm_interval = self.alarm_interval;
        let alarm_shutdown = shutdown.clone();
        let alarm_handle = tokio::spawn(async move {
            alarms.run(alarm_interval, alarm_shutdown).await;
        });

        let scaling = self.scaling.clone();
        let autoscale_interval = self.autoscale_interval;
        let autoscale_handle = tokio::spawn(async move {
            scaling.run(autoscale_interval, shutdown).await;
        });

        vec![alarm_handle, autoscale_handle]
    }
}
