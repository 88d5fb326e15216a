use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Delivery is best effort. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, note: &Notification) -> Result<(), NotifyError>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, note: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(
            recipient = %note.recipient_id,
            title = %note.title,
            "notification dropped"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to a dispatcher endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, note: &Notification) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(note).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}
