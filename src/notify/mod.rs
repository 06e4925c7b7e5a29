//! Anomaly Notifications
//!
//! The aggregation engine owns one [`RateLimiter`] shared by every machine and
//! hands honored notifications to a [`Notifier`]:
//! - [`WebhookNotifier`]: POSTs the notification as JSON
//! - [`LogNotifier`]: logs it (no delivery provider configured)

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{defaults, NotifyConfig};
use crate::types::FaultReport;

// ============================================================================
// Rate Limiter
// ============================================================================

/// Single cooldown clock: at most one notification per cooldown interval.
///
/// Requests inside the window are dropped, never queued.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cooldown: Duration,
    next_allowed: Option<NaiveDateTime>,
}

impl RateLimiter {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self {
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::seconds(60)),
            next_allowed: None,
        }
    }

    /// Returns true and restarts the cooldown if a send is allowed at `now`.
    pub fn try_acquire(&mut self, now: NaiveDateTime) -> bool {
        match self.next_allowed {
            Some(next) if now < next => false,
            _ => {
                self.next_allowed = Some(now + self.cooldown);
                true
            }
        }
    }

    pub fn next_allowed(&self) -> Option<NaiveDateTime> {
        self.next_allowed
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Message handed to the delivery provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub machine: String,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn anomaly(topic: &str, machine: &str, report: &FaultReport) -> Self {
        Self {
            topic: topic.to_string(),
            machine: machine.to_string(),
            title: format!("{machine} anomaly detected"),
            body: format!("score/threshold: {}/{}", report.score, report.threshold),
        }
    }
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider returned status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Delivery provider contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            topic = %notification.topic,
            machine = %notification.machine,
            "[Notify] {}: {}",
            notification.title,
            notification.body
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// POSTs notifications as JSON to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(defaults::NOTIFY_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let resp = self.http.post(&self.url).json(notification).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(resp.status()))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Build the notifier selected by configuration.
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    })
}
