//! Dry-run runtime collaborator.
//!
//! Stands in for the real infrastructure runtime: capacity changes, plan
//! applies and rollbacks are logged and remembered but touch nothing.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use sloguard_autoscale::CapacityActuator;
use sloguard_core::ActuationError;
use sloguard_gate::{ReleaseActuator, ReleasePlan};

#[derive(Debug, Default)]
pub struct DryRunRuntime {
    capacities: Mutex<BTreeMap<String, u32>>,
    rollbacks: Mutex<Vec<String>>,
}

impl DryRunRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last capacity applied to `resource_id`.
    pub fn capacity(&self, resource_id: &str) -> Option<u32> {
        self.capacities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource_id)
            .copied()
    }

    /// Environments rolled back so far, oldest first.
    pub fn rollbacks(&self) -> Vec<String> {
        self.rollbacks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CapacityActuator for DryRunRuntime {
    async fn apply_capacity(&self, resource_id: &str, desired: u32) -> Result<(), ActuationError> {
        info!(resource_id, desired, "dry-run: capacity applied");
        self.capacities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource_id.to_string(), desired);
        Ok(())
    }
}

#[async_trait]
impl ReleaseActuator for DryRunRuntime {
    async fn apply_plan(&self, plan: &ReleasePlan) -> Result<(), ActuationError> {
        let s = plan.summary();
        info!(
            environment = %plan.environment,
            create = s.create,
            update = s.update,
            replace = s.replace,
            delete = s.delete,
            "dry-run: plan applied"
        );
        Ok(())
    }

    async fn rollback(&self, environment: &str) -> Result<(), ActuationError> {
        info!(environment, "dry-run: rolled back");
        self.rollbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(environment.to_string());
        Ok(())
    }
}
