//! Policy events and their delivery to external notifiers.

pub mod events;
pub mod notifier;
pub mod registry;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use events::{EventKind, PolicyEvent};
pub use notifier::Notifier;
pub use registry::NotifierRegistry;
pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl NotificationsConfig {
    /// Registry with every configured notifier, or `None` when nothing is set
    pub fn build_registry(&self) -> Result<Option<Arc<NotifierRegistry>>> {
        let Some(url) = &self.webhook_url else {
            return Ok(None);
        };

        let registry = NotifierRegistry::new();
        let webhook = WebhookNotifier::new(url.as_str(), Duration::from_millis(self.timeout_ms))?;
        registry.register(Arc::new(webhook));
        Ok(Some(Arc::new(registry)))
    }
}
