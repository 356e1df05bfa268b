//! Push notifications.
//!
//! Heart-rate alerts go out with urgent priority, data-absence alerts with
//! high priority and the daily report with default priority. When no ntfy topic is configured the [`LogNotifier`] stands in.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{AlertCategory, AlertEvent};

/// Errors from a notifier.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    /// The request failed or the server rejected it.
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Notification urgency, in ntfy's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Regular delivery.
    Default,
    /// Prominent delivery.
    High,
    /// Break through do-not-disturb.
    Urgent,
}

impl Priority {
    /// Header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// One message to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Short ASCII title.
    pub title: String,
    /// Message body.
    pub body: String,
    /// Urgency.
    pub priority: Priority,
    /// ntfy emoji tags.
    pub tags: &'static str,
}

impl Notification {
    /// An anomaly or data-absence alert.
    #[must_use]
    pub fn alert(alert: &AlertEvent) -> Self {
        Self {
            title: "HEALTH ALERT".to_string(),
            body: format!(
                "{}\n{}",
                alert.message,
                alert.at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            priority: match alert.category {
                AlertCategory::DataAbsence => Priority::High,
                AlertCategory::Bradycardia | AlertCategory::Tachycardia => Priority::Urgent,
            },
            tags: "rotating_light,heart",
        }
    }

    /// The daily summary.
    #[must_use]
    pub fn report(body: impl Into<String>) -> Self {
        Self {
            title: "DAILY HEALTH REPORT".to_string(),
            body: body.into(),
            priority: Priority::Default,
            tags: "bar_chart,heart",
        }
    }
}

/// Delivers [`Notification`]s.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Push one notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Posts to an ntfy topic.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
    url: String,
}

impl NtfyNotifier {
    /// Create a notifier for `{server}/{topic}`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::Client`] if the HTTP client cannot be built.
    pub fn new(server: &str, topic: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/{}", server.trim_end_matches('/'), topic),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        self.client
            .post(&self.url)
            .header("Title", &notification.title)
            .header("Priority", notification.priority.as_str())
            .header("Tags", notification.tags)
            .body(notification.body.clone())
            .send()
            .await?
            .error_for_status()?;
        debug!(url = %self.url, title = %notification.title, "notification sent");
        Ok(())
    }
}

/// Logs notifications instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        info!(
            title = %notification.title,
            priority = notification.priority.as_str(),
            body = %notification.body,
            "notification (no topic configured)"
        );
        Ok(())
    }
}
