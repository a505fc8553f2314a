//! Periodic evaluation of every configured alarm.
//!
//! Alarms evaluate in parallel; each alarm's machine sits behind its own
//! async mutex so ticks for one alarm never overlap.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use sloguard_core::{AlarmSpec, Clock, Timestamp, period_end, system_clock};
use sloguard_metrics::CompositeEvaluator;
use sloguard_notify::{AlarmTransition, Notification, Notifier};
use sloguard_state::{AlarmState, StateStore};

use crate::error::{AlarmError, AlarmResult};
use crate::machine::AlarmStateMachine;

/// Owns every alarm machine and drives them from the metric store.
pub struct AlarmEvaluator {
    alarms: BTreeMap<String, Arc<Mutex<AlarmStateMachine>>>,
    metrics: CompositeEvaluator,
    notifier: Notifier,
    state: Option<StateStore>,
    clock: Clock,
}

impl AlarmEvaluator {
    /// Create an evaluator with fresh (OK) alarm state.
    pub fn new(specs: Vec<AlarmSpec>, metrics: CompositeEvaluator, notifier: Notifier) -> Self {
        let alarms = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), Arc::new(Mutex::new(AlarmStateMachine::new(spec)))))
            .collect();
        Self {
            alarms,
            metrics,
            notifier,
            state: None,
            clock: system_clock(),
        }
    }

    /// Replace the clock the evaluation loop reads.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Persist state to `store`, resuming every alarm from its last
    /// snapshot when one exists.
    pub async fn with_state(mut self, store: StateStore) -> AlarmResult<Self> {
        for (name, machine) in &self.alarms {
            if let Some(saved) = store.get_alarm_state(name)? {
                let mut guard = machine.lock().await;
                let spec = guard.spec().clone();
                debug!(alarm = %name, state = %saved.current_state, "restored alarm state");
                *guard = AlarmStateMachine::restore(spec, saved);
            }
        }
        self.state = Some(store);
        Ok(self)
    }

    /// Names of all configured alarms.
    pub fn names(&self) -> Vec<String> {
        self.alarms.keys().cloned().collect()
    }

    pub async fn spec(&self, name: &str) -> AlarmResult<AlarmSpec> {
        let machine = self.machine(name)?;
        let guard = machine.lock().await;
        Ok(guard.spec().clone())
    }

    /// Current state of one alarm.
    pub async fn state(&self, name: &str) -> AlarmResult<AlarmState> {
        let machine = self.machine(name)?;
        let guard = machine.lock().await;
        Ok(guard.state().clone())
    }

    /// Current state of every alarm, sorted by name.
    pub async fn states(&self) -> Vec<AlarmState> {
        let mut out = Vec::with_capacity(self.alarms.len());
        for machine in self.alarms.values() {
            out.push(machine.lock().await.state().clone());
        }
        out
    }

    fn machine(&self, name: &str) -> AlarmResult<&Arc<Mutex<AlarmStateMachine>>> {
        self.alarms
            .get(name)
            .ok_or_else(|| AlarmError::NotFound(name.to_string()))
    }

    /// Evaluate one alarm for its latest complete period at `now`.
    ///
    /// Periods are aligned to the alarm's own `period_secs`, so any number
    /// of calls within one period count as a single evaluation. Missing and
    /// undefined metric values are both treated as missing data. Returns the
    /// transition, if any, after it was published.
    pub async fn evaluate(&self, name: &str, now: Timestamp) -> AlarmResult<Option<AlarmTransition>> {
        let machine = self.machine(name)?;
        let mut guard = machine.lock().await;
        let spec = guard.spec();
        let end = period_end(now, spec.period_secs);
        if !guard.is_new_period(end) {
            return Ok(None);
        }

        let observation = match self
            .metrics
            .resolve_latest(&spec.metric, end, spec.period_secs)
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(alarm = %name, reason = %e, "no value for period");
                None
            }
        };

        let transition = guard.evaluate(observation, end);
        if let Some(store) = &self.state {
            store.put_alarm_state(guard.state())?;
        }
        drop(guard);

        if let Some(t) = &transition {
            info!(
                alarm = %t.alarm_name,
                from = %t.old_state,
                to = %t.new_state,
                value = ?t.breaching_value,
                "alarm state changed"
            );
            self.notifier
                .publish(Notification::AlarmTransition(t.clone()))
                .await;
        }
        Ok(transition)
    }

    /// Evaluate every alarm concurrently. Failures are logged per alarm.
    pub async fn evaluate_all(&self, now: Timestamp) -> Vec<AlarmTransition> {
        let ticks = self.alarms.keys().map(|name| async move {
            match self.evaluate(name, now).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(alarm = %name, error = %e, "alarm evaluation failed");
                    None
                }
            }
        });
        join_all(ticks).await.into_iter().flatten().collect()
    }

    /// Run the evaluation loop until shutdown.
    ///
    /// A panicking tick is caught and logged; the loop continues on the next
    /// interval.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            alarms = self.alarms.len(),
            "alarm evaluator started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let tick = AssertUnwindSafe(self.evaluate_all((self.clock)())).catch_unwind();
                    if tick.await.is_err() {
                        error!("alarm evaluation tick panicked");
                    }
                }
                _ = shutdown.changed() => {
                    info!("alarm evaluator shutting down");
                    break;
                }
            }
        }
    }
}
