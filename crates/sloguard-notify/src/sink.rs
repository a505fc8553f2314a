//! Notification sinks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use sloguard_core::AlarmStateValue;

use crate::Notification;

/// Destination for control-plane notifications (pager, chat, audit log).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name used in logs.
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Mirrors every notification into the structured log.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::AlarmTransition(t) => {
                let old = t.old_state.to_string();
                let new = t.new_state.to_string();
                if t.new_state == AlarmStateValue::Alarm {
                    warn!(alarm = %t.alarm_name, %old, %new, value = ?t.breaching_value, "alarm transition");
                } else {
                    info!(alarm = %t.alarm_name, %old, %new, value = ?t.breaching_value, "alarm transition");
                }
            }
            Notification::DeploymentOutcome(r) => {
                info!(
                    environment = %r.environment,
                    id = %r.id,
                    outcome = ?r.outcome,
                    rollback = r.rollback_issued,
                    "deployment finished"
                );
            }
        }
        Ok(())
    }
}

/// Keeps every delivered notification in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.delivered.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.delivered.lock().await.is_empty()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}
