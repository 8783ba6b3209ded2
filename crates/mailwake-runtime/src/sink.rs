//! Notification delivery: HTTP POST of `{"text", "mode"}` with a bearer token.

use std::future::Future;
use std::time::Duration;

use mailwake_core::Notification;
use thiserror::Error;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Where closed batches go. One attempt per notification, no retry.
pub trait NotificationSink: Send + Sync + 'static {
    fn send(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }

    fn request(&self, notification: &Notification) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(notification)
    }
}

impl NotificationSink for WebhookSink {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        let response = self.request(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        tracing::debug!(status = status.as_u16(), "webhook accepted notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwake_core::DeliveryMode;

    #[test]
    fn request_carries_bearer_and_json_body() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hooks/wake", "s3cret").expect("client");
        let notification = Notification {
            text: "📧 New email in work:\nFrom: a\nSubject: b".to_string(),
            mode: DeliveryMode::NextHeartbeat,
            event_count: 1,
        };

        let request = sink.request(&notification).build().expect("build");
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/hooks/wake");
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer s3cret")
        );

        let body = request.body().and_then(|b| b.as_bytes()).expect("buffered body");
        let json: serde_json::Value = serde_json::from_slice(body).expect("json");
        assert_eq!(json["mode"], "next-heartbeat");
        assert_eq!(json["text"], notification.text);
        assert!(json.get("event_count").is_none());
    }
}
