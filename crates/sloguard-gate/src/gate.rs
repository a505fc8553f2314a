//! Deployment gate — drives one release through its safety state machine.
//!
//! ```text
//! Planned ─► AwaitingConfirmation (high risk only) ─► Applying ─► Verifying
//!               │ timeout / cancel                      │ error     │
//!               ▼                                       ▼           ▼
//!           Cancelled                                 Failed   Succeeded
//!                                                               RolledBack
//!                                                               Failed
//!                                                               Cancelled
//! ```
//!
//! At most one deployment per environment is in flight; a second submission
//! fails fast with [`GateError::Busy`]. Every terminal state appends a
//! [`DeploymentRecord`] and publishes it on the notification stream.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use sloguard_alarm::AlarmEvaluator;
use sloguard_core::{
    ActuationError, AlarmStateValue, EnvironmentPolicy, RiskTier, Timestamp, epoch_secs,
};
use sloguard_health::HealthProbe;
use sloguard_notify::{Notification, Notifier};
use sloguard_state::{
    DeploymentOutcome, DeploymentRecord, StateStore, VerificationResult,
};

use crate::error::{GateError, GateResult};
use crate::plan::{ReleasePlan, Resource};
use crate::report::SloReport;

/// Runtime calls that change an environment.
#[async_trait]
pub trait ReleaseActuator: Send + Sync {
    async fn apply_plan(&self, plan: &ReleasePlan) -> Result<(), ActuationError>;
    async fn rollback(&self, environment: &str) -> Result<(), ActuationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Planned,
    AwaitingConfirmation,
    Applying,
    Verifying,
    Succeeded,
    RolledBack,
    Failed,
    Cancelled,
}

impl GatePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatePhase::Succeeded | GatePhase::RolledBack | GatePhase::Failed | GatePhase::Cancelled
        )
    }
}

impl From<DeploymentOutcome> for GatePhase {
    fn from(outcome: DeploymentOutcome) -> Self {
        match outcome {
            DeploymentOutcome::Success => GatePhase::Succeeded,
            DeploymentOutcome::RolledBack => GatePhase::RolledBack,
            DeploymentOutcome::Failed => GatePhase::Failed,
            DeploymentOutcome::Cancelled => GatePhase::Cancelled,
        }
    }
}

/// Pollable view of the latest deployment of an environment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub id: String,
    pub environment: String,
    pub phase: GatePhase,
    pub plan: ReleasePlan,
    pub started_at: Timestamp,
    /// Set once the deployment is terminal.
    pub record: Option<DeploymentRecord>,
}

/// Operator inputs of the deployment currently in flight.
struct InFlight {
    id: String,
    confirm: watch::Sender<bool>,
    cancel: watch::Sender<bool>,
}

/// A claimed environment slot. Dropping it frees the slot.
pub struct Claim {
    id: String,
    environment: String,
    confirm: watch::Receiver<bool>,
    cancel: watch::Receiver<bool>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl Claim {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.environment);
    }
}

/// Ids sort in submission order within one environment and second.
fn deployment_id(environment: &str, started_at: Timestamp, seq: u64) -> String {
    format!("{environment}-{started_at}-{seq:020}")
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resolve once the flag is set. Pends forever if the sender is gone.
async fn flag_set(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Verdict {
    Passed,
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct Run {
    results: Vec<VerificationResult>,
    rollback_issued: bool,
}

pub struct DeploymentGate {
    environments: BTreeMap<String, EnvironmentPolicy>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    statuses: Mutex<HashMap<String, DeploymentStatus>>,
    runtime: Arc<dyn ReleaseActuator>,
    probe: Arc<dyn HealthProbe>,
    alarms: Arc<AlarmEvaluator>,
    notifier: Notifier,
    state: StateStore,
    next_id: AtomicU64,
}

impl DeploymentGate {
    pub fn new(
        runtime: Arc<dyn ReleaseActuator>,
        probe: Arc<dyn HealthProbe>,
        alarms: Arc<AlarmEvaluator>,
        notifier: Notifier,
        state: StateStore,
    ) -> Self {
        Self {
            environments: BTreeMap::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            statuses: Mutex::new(HashMap::new()),
            runtime,
            probe,
            alarms,
            notifier,
            state,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_environment(mut self, policy: EnvironmentPolicy) -> Self {
        self.environments.insert(policy.name.clone(), policy);
        self
    }

    pub fn with_environments(mut self, policies: Vec<EnvironmentPolicy>) -> Self {
        for policy in policies {
            self.environments.insert(policy.name.clone(), policy);
        }
        self
    }

    pub fn environment(&self, name: &str) -> GateResult<&EnvironmentPolicy> {
        self.environments
            .get(name)
            .ok_or_else(|| GateError::UnknownEnvironment(name.to_string()))
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Diff `current` against `proposed` for `environment`. No side effects.
    pub fn plan(
        &self,
        environment: &str,
        current: &[Resource],
        proposed: &[Resource],
    ) -> GateResult<ReleasePlan> {
        let policy = self.environment(environment)?;
        let plan = ReleasePlan::compute(environment, policy.risk_tier, current, proposed);
        let s = plan.summary();
        debug!(
            environment,
            create = s.create,
            update = s.update,
            replace = s.replace,
            delete = s.delete,
            "release planned"
        );
        Ok(plan)
    }

    /// Reserve the environment for `plan`. Fails fast with `Busy`.
    pub fn claim(&self, plan: &ReleasePlan) -> GateResult<Claim> {
        self.environment(&plan.environment)?;
        let environment = plan.environment.clone();
        let mut in_flight = lock(&self.in_flight);
        if let Some(current) = in_flight.get(&environment) {
            debug!(%environment, in_flight = %current.id, "deployment rejected: busy");
            return Err(GateError::Busy(environment));
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let started_at = epoch_secs();
        let id = deployment_id(&environment, started_at, seq);
        let (confirm_tx, confirm_rx) = watch::channel(false);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        in_flight.insert(
            environment.clone(),
            InFlight {
                id: id.clone(),
                confirm: confirm_tx,
                cancel: cancel_tx,
            },
        );
        drop(in_flight);

        lock(&self.statuses).insert(
            environment.clone(),
            DeploymentStatus {
                id: id.clone(),
                environment: environment.clone(),
                phase: GatePhase::Planned,
                plan: plan.clone(),
                started_at,
                record: None,
            },
        );
        info!(%environment, %id, changes = plan.changes.len(), "deployment submitted");

        Ok(Claim {
            id,
            environment,
            confirm: confirm_rx,
            cancel: cancel_rx,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run a deployment to completion and return its record.
    pub async fn submit(&self, plan: ReleasePlan) -> GateResult<DeploymentRecord> {
        let claim = self.claim(&plan)?;
        self.execute(claim, plan).await
    }

    /// Start a deployment in the background; poll with
    /// [`status`](Self::status).
    pub fn start(self: &Arc<Self>, plan: ReleasePlan) -> GateResult<String> {
        let claim = self.claim(&plan)?;
        let id = claim.id.clone();
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = gate.execute(claim, plan).await {
                warn!(error = %e, "deployment bookkeeping failed");
            }
        });
        Ok(id)
    }

    /// Drive a claimed deployment through the state machine.
    pub async fn execute(&self, mut claim: Claim, plan: ReleasePlan) -> GateResult<DeploymentRecord> {
        let policy = self.environment(&plan.environment)?.clone();
        let started_at = lock(&self.statuses)
            .get(&plan.environment)
            .map(|s| s.started_at)
            .unwrap_or_else(epoch_secs);

        let mut run = Run::default();
        let (outcome, error) = self.drive(&mut claim, &policy, &plan, &mut run).await;

        let record = DeploymentRecord {
            id: claim.id.clone(),
            environment: plan.environment.clone(),
            timestamp: started_at,
            outcome,
            risk_tier: plan.risk_tier,
            change_count: plan.changes.len(),
            verification_results: run.results,
            rollback_issued: run.rollback_issued,
            error,
        };
        info!(
            environment = %record.environment,
            id = %record.id,
            outcome = ?record.outcome,
            rollback = record.rollback_issued,
            error = ?record.error,
            "deployment finished"
        );

        let stored = self.state.append_deployment_record(&record);
        if let Some(status) = lock(&self.statuses).get_mut(&plan.environment) {
            status.phase = GatePhase::from(outcome);
            status.record = Some(record.clone());
        }
        drop(claim);
        self.notifier
            .publish(Notification::DeploymentOutcome(record.clone()))
            .await;
        stored?;
        Ok(record)
    }

    /// Confirm the high-risk deployment awaiting confirmation.
    pub fn confirm(&self, environment: &str) -> GateResult<()> {
        let in_flight = lock(&self.in_flight);
        let flight = in_flight
            .get(environment)
            .ok_or_else(|| GateError::NoDeployment(environment.to_string()))?;
        info!(environment, id = %flight.id, "deployment confirmed");
        flight.confirm.send_replace(true);
        Ok(())
    }

    /// Cancel the in-flight deployment. Honored while awaiting
    /// confirmation and between verification attempts, never mid-apply.
    pub fn cancel(&self, environment: &str) -> GateResult<()> {
        let in_flight = lock(&self.in_flight);
        let flight = in_flight
            .get(environment)
            .ok_or_else(|| GateError::NoDeployment(environment.to_string()))?;
        info!(environment, id = %flight.id, "deployment cancellation requested");
        flight.cancel.send_replace(true);
        Ok(())
    }

    /// Latest deployment of `environment`, in flight or finished.
    pub fn status(&self, environment: &str) -> Option<DeploymentStatus> {
        lock(&self.statuses).get(environment).cloned()
    }

    /// Recorded deployments of `environment`, newest first.
    pub fn history(&self, environment: &str, limit: usize) -> GateResult<Vec<DeploymentRecord>> {
        Ok(self.state.list_deployment_records(environment, limit)?)
    }

    /// Current SLO compliance of `environment`.
    pub async fn slo_report(&self, environment: &str) -> GateResult<SloReport> {
        let policy = self.environment(environment)?;
        Ok(SloReport::build(environment, &policy.slo_alarms, &self.alarms, epoch_secs()).await?)
    }

    fn set_phase(&self, environment: &str, phase: GatePhase) {
        if let Some(status) = lock(&self.statuses).get_mut(environment) {
            status.phase = phase;
        }
        debug!(environment, ?phase, "deployment phase");
    }

    async fn drive(
        &self,
        claim: &mut Claim,
        policy: &EnvironmentPolicy,
        plan: &ReleasePlan,
        run: &mut Run,
    ) -> (DeploymentOutcome, Option<String>) {
        let environment = plan.environment.as_str();

        if plan.risk_tier == RiskTier::High {
            self.set_phase(environment, GatePhase::AwaitingConfirmation);
            info!(
                environment,
                id = %claim.id,
                timeout_secs = policy.confirmation_timeout.as_secs(),
                "awaiting confirmation"
            );
            let wait = async {
                tokio::select! {
                    _ = flag_set(&mut claim.confirm) => true,
                    _ = flag_set(&mut claim.cancel) => false,
                }
            };
            match timeout(policy.confirmation_timeout, wait).await {
                Ok(true) => {}
                Ok(false) => {
                    return (DeploymentOutcome::Cancelled, Some("cancelled before apply".to_string()));
                }
                Err(_) => {
                    let e = GateError::Timeout {
                        phase: "confirmation",
                        after: policy.confirmation_timeout,
                    };
                    return (DeploymentOutcome::Cancelled, Some(e.to_string()));
                }
            }
        }

        if *claim.cancel.borrow() {
            return (DeploymentOutcome::Cancelled, Some("cancelled before apply".to_string()));
        }

        self.set_phase(environment, GatePhase::Applying);
        match timeout(policy.apply_timeout, self.runtime.apply_plan(plan)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return (DeploymentOutcome::Failed, Some(e.to_string())),
            Err(_) => {
                let e = GateError::Timeout {
                    phase: "apply",
                    after: policy.apply_timeout,
                };
                return (DeploymentOutcome::Failed, Some(e.to_string()));
            }
        }

        self.set_phase(environment, GatePhase::Verifying);
        match self.verify(policy, &mut claim.cancel, run).await {
            Verdict::Passed => (DeploymentOutcome::Success, None),
            Verdict::Failed(reason) if policy.circuit_breaker => {
                warn!(environment, %reason, "verification failed, rolling back");
                match self.roll_back(policy, run).await {
                    Ok(()) => (DeploymentOutcome::RolledBack, Some(reason)),
                    Err(e) => (
                        DeploymentOutcome::Failed,
                        Some(format!("{reason}; rollback failed: {e}")),
                    ),
                }
            }
            Verdict::Failed(reason) => {
                warn!(environment, %reason, "verification failed, circuit breaker disabled");
                (DeploymentOutcome::Failed, Some(reason))
            }
            Verdict::Cancelled => {
                let mut reason = "cancelled during verification".to_string();
                if policy.circuit_breaker
                    && let Err(e) = self.roll_back(policy, run).await
                {
                    reason = format!("{reason}; rollback failed: {e}");
                }
                (DeploymentOutcome::Cancelled, Some(reason))
            }
        }
    }

    /// Issue the single rollback call for this deployment.
    async fn roll_back(&self, policy: &EnvironmentPolicy, run: &mut Run) -> Result<(), String> {
        run.rollback_issued = true;
        match timeout(policy.apply_timeout, self.runtime.rollback(&policy.name)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(GateError::Timeout {
                phase: "rollback",
                after: policy.apply_timeout,
            }
            .to_string()),
        }
    }

    /// Readiness polling followed by the post-deploy alarm window.
    async fn verify(
        &self,
        policy: &EnvironmentPolicy,
        cancel: &mut watch::Receiver<bool>,
        run: &mut Run,
    ) -> Verdict {
        let attempts = policy.verify_attempts.max(1);
        let mut ready_after = None;
        for attempt in 1..=attempts {
            if *cancel.borrow() {
                return Verdict::Cancelled;
            }
            let ready = timeout(policy.probe_timeout, self.probe.probe(&policy.health_target))
                .await
                .unwrap_or(false);
            debug!(environment = %policy.name, attempt, ready, "readiness probe");
            if ready {
                ready_after = Some(attempt);
                break;
            }
            if attempt < attempts {
                tokio::select! {
                    _ = sleep(policy.verify_interval) => {}
                    _ = flag_set(cancel) => return Verdict::Cancelled,
                }
            }
        }

        let Some(n) = ready_after else {
            let reason = format!(
                "{} not ready after {attempts} attempts",
                policy.health_target
            );
            run.results.push(VerificationResult::fail("health_probe", reason.clone()));
            return Verdict::Failed(reason);
        };
        run.results.push(VerificationResult::pass(
            "health_probe",
            format!("ready after {n} attempt(s)"),
        ));

        if policy.slo_alarms.is_empty() {
            return Verdict::Passed;
        }

        let deadline = Instant::now() + policy.alarm_window;
        let poll = policy.verify_interval.max(Duration::from_millis(10));
        let mut fired = BTreeSet::new();
        loop {
            for name in &policy.slo_alarms {
                match self.alarms.state(name).await {
                    Ok(s) if s.current_state == AlarmStateValue::Alarm => {
                        fired.insert(name.clone());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(environment = %policy.name, alarm = %name, error = %e, "cannot read SLO alarm"),
                }
            }
            let now = Instant::now();
            if !fired.is_empty() || now >= deadline {
                break;
            }
            tokio::select! {
                _ = sleep((deadline - now).min(poll)) => {}
                _ = flag_set(cancel) => return Verdict::Cancelled,
            }
        }

        match SloReport::build(&policy.name, &policy.slo_alarms, &self.alarms, epoch_secs()).await {
            Ok(report) => {
                for check in &report.checks {
                    let check_name = format!("alarm:{}", check.alarm);
                    let detail = format!("{:?}: {}", check.status, check.message);
                    run.results.push(if fired.contains(&check.alarm) {
                        VerificationResult::fail(&check_name, detail)
                    } else {
                        VerificationResult::pass(&check_name, detail)
                    });
                }
            }
            Err(e) => warn!(environment = %policy.name, error = %e, "SLO report unavailable"),
        }

        if fired.is_empty() {
            Verdict::Passed
        } else {
            let names: Vec<String> = fired.into_iter().collect();
            Verdict::Failed(format!(
                "SLO alarm fired during verification: {}",
                names.join(", ")
            ))
        }
    }
}
