//! Release planning — diff of current vs proposed resources.
//!
//! Planning is pure: it never calls the runtime.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sloguard_core::RiskTier;

/// One declared resource of an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique address, e.g. `ecs_service.web`.
    pub address: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Attributes whose change forces the resource to be replaced.
    #[serde(default)]
    pub force_new: BTreeSet<String>,
}

impl Resource {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            attributes: BTreeMap::new(),
            force_new: BTreeSet::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn force_new_on(mut self, key: &str) -> Self {
        self.force_new.insert(key.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Replace,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    pub action: ChangeAction,
    /// Attribute keys that differ (empty for create/delete).
    pub changed_attributes: Vec<String>,
}

/// The proposed changes to one environment. Consumed once by apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePlan {
    pub environment: String,
    pub risk_tier: RiskTier,
    pub changes: Vec<ResourceChange>,
}

/// Counts per action, in `terraform plan` order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl ReleasePlan {
    /// Diff `current` against `proposed`. Resources are matched by address;
    /// the output is sorted by address.
    pub fn compute(
        environment: &str,
        risk_tier: RiskTier,
        current: &[Resource],
        proposed: &[Resource],
    ) -> Self {
        let before: BTreeMap<&str, &Resource> =
            current.iter().map(|r| (r.address.as_str(), r)).collect();
        let after: BTreeMap<&str, &Resource> =
            proposed.iter().map(|r| (r.address.as_str(), r)).collect();

        let mut changes = Vec::new();
        let addresses: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();
        for address in addresses {
            let change = match (before.get(address), after.get(address)) {
                (None, Some(_)) => Some((ChangeAction::Create, Vec::new())),
                (Some(_), None) => Some((ChangeAction::Delete, Vec::new())),
                (Some(old), Some(new)) => {
                    let changed = changed_attributes(old, new);
                    if changed.is_empty() {
                        None
                    } else if changed.iter().any(|k| new.force_new.contains(k)) {
                        Some((ChangeAction::Replace, changed))
                    } else {
                        Some((ChangeAction::Update, changed))
                    }
                }
                (None, None) => None,
            };
            if let Some((action, changed_attributes)) = change {
                changes.push(ResourceChange {
                    address: address.to_string(),
                    action,
                    changed_attributes,
                });
            }
        }

        Self {
            environment: environment.to_string(),
            risk_tier,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for c in &self.changes {
            match c.action {
                ChangeAction::Create => s.create += 1,
                ChangeAction::Update => s.update += 1,
                ChangeAction::Replace => s.replace += 1,
                ChangeAction::Delete => s.delete += 1,
            }
        }
        s
    }

    /// Whether the plan destroys anything (delete or replace).
    pub fn is_destructive(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c.action, ChangeAction::Delete | ChangeAction::Replace))
    }
}

fn changed_attributes(old: &Resource, new: &Resource) -> Vec<String> {
    let keys: BTreeSet<&String> = old.attributes.keys().chain(new.attributes.keys()).collect();
    keys.into_iter()
        .filter(|k| old.attributes.get(*k) != new.attributes.get(*k))
        .cloned()
        .collect()
}
