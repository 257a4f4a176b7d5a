//! Alert delivery channels.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::SecurityAlert;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_alert(&self, alert: &SecurityAlert) -> Result<(), anyhow::Error>;
}

/// Writes alerts to the log at error level. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send_alert(&self, alert: &SecurityAlert) -> Result<(), anyhow::Error> {
        tracing::error!(
            event_type = alert.event_type.as_str(),
            identifier = %alert.identifier,
            endpoint = %alert.endpoint,
            event_count = alert.event_count,
            window_seconds = alert.window_seconds,
            "Security alert: {}",
            alert.summary()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    alert: &'a SecurityAlert,
}

/// POSTs a JSON payload to an operator webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build webhook client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn send_alert(&self, alert: &SecurityAlert) -> Result<(), anyhow::Error> {
        let payload = WebhookPayload {
            text: alert.summary(),
            alert,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Webhook request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Webhook responded with {}", status));
        }

        tracing::debug!(status = %status, "Security alert delivered to webhook");
        Ok(())
    }
}

/// Keeps alerts in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<SecurityAlert>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn send_alert(&self, alert: &SecurityAlert) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("notification channel unavailable"));
        }
        self.alerts
            .lock()
            .map_err(|e| anyhow::anyhow!("Notifier mutex poisoned: {}", e))?
            .push(alert.clone());
        Ok(())
    }
}
