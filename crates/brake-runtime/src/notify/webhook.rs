use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::events::PolicyEvent;
use super::notifier::Notifier;

/// POSTs every event as JSON to a fixed URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        reqwest::Url::parse(&url).with_context(|| format!("Invalid webhook URL: {}", url))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &PolicyEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Webhook failed: {}", status);
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
