//! All scaling controllers of the control plane and their loop.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use sloguard_core::{Clock, ScalableTargetSpec, Timestamp, system_clock};
use sloguard_metrics::{CapacityGauge, CompositeEvaluator};

use crate::controller::{CapacityActuator, ScalableTarget, ScaleDecision, ScalingController};
use crate::error::{ScalingError, ScalingResult};

/// Scaling controllers keyed by resource id.
pub struct ScalingRegistry {
    controllers: BTreeMap<String, Arc<ScalingController>>,
    clock: Clock,
}

impl Default for ScalingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalingRegistry {
    pub fn new() -> Self {
        Self {
            controllers: BTreeMap::new(),
            clock: system_clock(),
        }
    }

    /// Replace the clock the autoscaling loop reads.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Build one controller per target, sharing `metrics` and `actuator`.
    pub fn from_specs(
        specs: Vec<ScalableTargetSpec>,
        metrics: CompositeEvaluator,
        actuator: Arc<dyn CapacityActuator>,
    ) -> ScalingResult<Self> {
        let mut registry = Self::new();
        for spec in specs {
            let controller = ScalingController::new(spec, metrics.clone(), Arc::clone(&actuator))?;
            registry.insert(controller);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, controller: ScalingController) {
        self.controllers
            .insert(controller.resource_id().to_string(), Arc::new(controller));
    }

    pub fn get(&self, resource_id: &str) -> ScalingResult<&Arc<ScalingController>> {
        self.controllers
            .get(resource_id)
            .ok_or_else(|| ScalingError::NotFound(resource_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub async fn current_capacity(&self, resource_id: &str) -> ScalingResult<u32> {
        Ok(self.get(resource_id)?.current_capacity().await)
    }

    pub async fn submit_forecast(
        &self,
        resource_id: &str,
        at: Timestamp,
        value: f64,
    ) -> ScalingResult<()> {
        self.get(resource_id)?.submit_forecast(at, value).await;
        Ok(())
    }

    /// Snapshot of every target, sorted by resource id.
    pub async fn targets(&self) -> Vec<ScalableTarget> {
        let mut out = Vec::with_capacity(self.controllers.len());
        for c in self.controllers.values() {
            out.push(c.snapshot().await);
        }
        out
    }

    pub async fn capacity_gauges(&self) -> Vec<CapacityGauge> {
        self.targets()
            .await
            .into_iter()
            .map(|t| CapacityGauge {
                resource_id: t.resource_id,
                capacity: t.current_capacity,
                min_capacity: t.min_capacity,
                max_capacity: t.max_capacity,
            })
            .collect()
    }

    /// Tick every controller concurrently.
    pub async fn tick_all(&self, now: Timestamp) -> Vec<(String, ScalingResult<ScaleDecision>)> {
        let ticks = self.controllers.iter().map(|(id, c)| async move {
            let result = c.tick(now).await;
            if let Err(e) = &result {
                warn!(resource_id = %id, error = %e, "scaling tick failed");
            }
            (id.clone(), result)
        });
        join_all(ticks).await
    }

    /// Run the autoscaling loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            targets = self.controllers.len(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let tick = AssertUnwindSafe(self.tick_all((self.clock)())).catch_unwind();
                    if tick.await.is_err() {
                        error!("autoscaling tick panicked");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
