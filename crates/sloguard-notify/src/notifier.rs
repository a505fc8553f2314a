//! Fan-out of notifications to sinks and broadcast subscribers.

use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::{Notification, NotificationSink};

const CHANNEL_CAPACITY: usize = 256;

/// Publishes notifications to every registered sink.
///
/// A failing sink is logged and skipped; it never blocks the other sinks or
/// the caller's control loop.
#[derive(Clone)]
pub struct Notifier {
    sinks: Arc<RwLock<Vec<Arc<dyn NotificationSink>>>>,
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sinks: Arc::new(RwLock::new(Vec::new())),
            tx,
        }
    }

    pub async fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        debug!(sink = sink.name(), "notification sink registered");
        self.sinks.write().await.push(sink);
    }

    /// Live stream of notifications published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub async fn publish(&self, notification: Notification) {
        let sinks = self.sinks.read().await.clone();
        for sink in sinks {
            if let Err(e) = sink.deliver(&notification).await {
                warn!(sink = sink.name(), subject = %notification.subject(), error = %e, "notification delivery failed");
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlarmTransition, MemorySink};
    use async_trait::async_trait;
    use sloguard_core::AlarmStateValue;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _notification: &Notification) -> anyhow::Result<()> {
            anyhow::bail!("pager unreachable")
        }
    }

    fn transition() -> Notification {
        Notification::AlarmTransition(AlarmTransition {
            alarm_name: "latency-slo".to_string(),
            old_state: AlarmStateValue::Ok,
            new_state: AlarmStateValue::Alarm,
            breaching_value: Some(0.9),
            timestamp: 120,
        })
    }

    #[tokio::test]
    async fn publish_reaches_sinks_and_subscribers() {
        let notifier = Notifier::new();
        let sink = Arc::new(MemorySink::new());
        notifier.add_sink(sink.clone()).await;
        let mut rx = notifier.subscribe();

        notifier.publish(transition()).await;

        assert_eq!(sink.delivered().await, vec![transition()]);
        assert_eq!(rx.recv().await.unwrap(), transition());
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let notifier = Notifier::new();
        let sink = Arc::new(MemorySink::new());
        notifier.add_sink(Arc::new(FailingSink)).await;
        notifier.add_sink(sink.clone()).await;

        notifier.publish(transition()).await;
        assert_eq!(sink.len().await, 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers() {
        let notifier = Notifier::new();
        notifier.publish(transition()).await;
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(transition()).unwrap();
        assert_eq!(json["kind"], "alarm_transition");
        assert_eq!(json["new_state"], "ALARM");
    }
}
