use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::events::{EventKind, PolicyEvent};

/// Sink for policy events (webhooks, chat integrations, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name for logging
    fn name(&self) -> &str;

    /// Event kinds this notifier subscribes to
    fn kinds(&self) -> &[EventKind] {
        &EventKind::ALL
    }

    async fn notify(&self, event: &PolicyEvent) -> Result<()>;

    /// Per-delivery timeout (default: 5s)
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}
