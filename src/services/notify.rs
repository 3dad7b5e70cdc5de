//! Failure notification sinks.

use super::NotificationSink;
use crate::error::ExtractError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Format of the timestamp attached to every notification.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

/// `now` rendered with [`TIMESTAMP_FORMAT`].
pub fn notification_timestamp(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Emits each notification as an `error!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn publish(
        &self,
        subject: &str,
        message: &str,
        timestamp: &str,
    ) -> Result<(), ExtractError> {
        error!(subject, timestamp, "{}", message);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    timestamp: &'a str,
    message: &'a str,
}

/// POSTs `{"subject", "timestamp", "message"}` as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn publish(
        &self,
        subject: &str,
        message: &str,
        timestamp: &str,
    ) -> Result<(), ExtractError> {
        let payload = WebhookPayload {
            subject,
            timestamp,
            message,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExtractError::NotificationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExtractError::NotificationFailed(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        debug!("Notification delivered to {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format() {
        let t = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(notification_timestamp(t), "03/07/2024, 09:05:01");
    }

    #[test]
    fn webhook_payload_shape() {
        let json = serde_json::to_value(WebhookPayload {
            subject: "s",
            timestamp: "t",
            message: "m",
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"subject": "s", "timestamp": "t", "message": "m"})
        );
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier.publish("s", "m", "t").await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_webhook_is_notification_failure() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", 1).unwrap();
        let err = notifier.publish("s", "m", "t").await.unwrap_err();
        assert!(err.is_notification_failure());
    }
}
