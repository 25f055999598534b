use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use super::events::{EventKind, PolicyEvent};
use super::notifier::Notifier;

/// Registry for notifiers, organized by event kind
pub struct NotifierRegistry {
    notifiers: DashMap<EventKind, Vec<Arc<dyn Notifier>>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self {
            notifiers: DashMap::new(),
        }
    }

    /// Register a notifier for its declared kinds
    pub fn register(&self, notifier: Arc<dyn Notifier>) {
        for kind in notifier.kinds() {
            self.notifiers
                .entry(*kind)
                .or_default()
                .push(notifier.clone());
        }
    }

    pub fn has_notifiers(&self, kind: EventKind) -> bool {
        self.notifiers
            .get(&kind)
            .map(|n| !n.is_empty())
            .unwrap_or(false)
    }

    /// Deliver an event to every subscribed notifier.
    /// Runs sequentially; failures and timeouts are logged, never propagated.
    /// Returns the number of successful deliveries.
    pub async fn dispatch(&self, event: &PolicyEvent) -> usize {
        let notifiers = self
            .notifiers
            .get(&event.event)
            .map(|n| n.clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for notifier in &notifiers {
            let timeout = notifier.timeout();
            match tokio::time::timeout(timeout, notifier.notify(event)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(notifier = notifier.name(), error = %e, "Notification failed");
                }
                Err(_) => {
                    warn!(
                        notifier = notifier.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Notification timed out"
                    );
                }
            }
        }
        delivered
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
