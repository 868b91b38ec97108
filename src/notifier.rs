//! Milestone notifications
//!
//! Delivery is fire-and-forget: [`NotificationSink::fire`] spawns one task per
//! notifier and never blocks the caller. Failures are logged and counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::rpc::{RateLimited, RetryPolicy};

const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Notification endpoint returned {status}")]
    Status { status: u16 },
}

impl RateLimited for NotifyError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, NotifyError::Status { status: 429 })
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Http(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    MigrationSeen,
    PoolMatched,
    PurchaseComplete,
    PositionCreated,
    ActionFailed,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Milestone::MigrationSeen => "Migration seen",
            Milestone::PoolMatched => "Pool matched",
            Milestone::PurchaseComplete => "Purchase complete",
            Milestone::PositionCreated => "Position created",
            Milestone::ActionFailed => "Action failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(rename = "event")]
    pub milestone: Milestone,
    pub text: String,
    #[serde(serialize_with = "serialize_display")]
    pub token: Pubkey,
    #[serde(serialize_with = "serialize_opt_display")]
    pub pool: Option<Pubkey>,
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn serialize_display<S: serde::Serializer>(value: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn serialize_opt_display<S: serde::Serializer>(value: &Option<Pubkey>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

impl Notification {
    pub fn new(milestone: Milestone, token: Pubkey, text: impl Into<String>) -> Self {
        Self {
            milestone,
            text: text.into(),
            token,
            pool: None,
            signature: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_pool(mut self, pool: Pubkey) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Plain-text rendering for chat transports
    pub fn render(&self) -> String {
        let mut out = format!("{}\n{}\ntoken: {}", self.milestone, self.text, self.token);
        if let Some(pool) = &self.pool {
            out.push_str(&format!("\npool: {}", pool));
        }
        if let Some(sig) = &self.signature {
            out.push_str(&format!("\ntx: {}", sig));
        }
        out
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

fn http_client(timeout: Duration) -> Result<Client, NotifyError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(NotifyError::from)
}

async fn post_json(client: &Client, url: &str, body: &serde_json::Value) -> Result<(), NotifyError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status {
            status: status.as_u16(),
        })
    }
}

/// POSTs the notification as JSON to a webhook URL
pub struct WebhookNotifier {
    http: Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration, retry: RetryPolicy) -> Result<Self, NotifyError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
            retry,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_value(notification).map_err(|e| NotifyError::Http(e.to_string()))?;
        self.retry
            .run("webhook", || post_json(&self.http, &self.url, &body))
            .await
    }
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    http: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: String,
        chat_id: String,
        api_base: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            http: http_client(timeout)?,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            bot_token,
            chat_id,
            retry,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": notification.render(),
            "disable_web_page_preview": true,
        });
        self.retry
            .run("telegram", || post_json(&self.http, &url, &body))
            .await
    }
}

/// Fans notifications out to every configured notifier
#[derive(Clone, Default)]
pub struct NotificationSink {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationSink {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver in the background. The handles are only useful to tests.
    pub fn fire(&self, notification: Notification) -> Vec<JoinHandle<()>> {
        debug!(event = ?notification.milestone, token = %notification.token, "Notification");
        let notification = Arc::new(notification);

        self.notifiers
            .iter()
            .map(|notifier| {
                let notifier = Arc::clone(notifier);
                let notification = Arc::clone(&notification);
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(&notification).await {
                        metrics().notifications_failed.inc();
                        warn!(
                            notifier = notifier.name(),
                            event = ?notification.milestone,
                            error = %e,
                            "Notification delivery failed"
                        );
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn sample() -> Notification {
        Notification::new(Milestone::PoolMatched, Pubkey::new_unique(), "pool qualified")
            .with_pool(Pubkey::new_unique())
            .with_signature("5sig")
    }

    #[test]
    fn test_json_shape() {
        let n = sample();
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["event"], "pool_matched");
        assert_eq!(value["text"], "pool qualified");
        assert_eq!(value["token"], n.token.to_string());
        assert_eq!(value["pool"], n.pool.unwrap().to_string());
        assert_eq!(value["signature"], "5sig");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let n = sample();
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({
                "event": "pool_matched",
                "token": n.token.to_string(),
            })))
            .with_status(204)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/hook", server.url()),
            Duration::from_secs(5),
            RetryPolicy::new(2, 1),
        )
        .unwrap();
        notifier.notify(&n).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(500).create_async().await;

        let notifier = WebhookNotifier::new(
            format!("{}/hook", server.url()),
            Duration::from_secs(5),
            RetryPolicy::new(2, 1),
        )
        .unwrap();
        assert!(matches!(
            notifier.notify(&sample()).await,
            Err(NotifyError::Status { status: 500 })
        ));
    }

    #[tokio::test]
    async fn test_telegram_send_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(json!({ "chat_id": "42" })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let notifier = TelegramNotifier::new(
            "TOKEN".to_string(),
            "42".to_string(),
            Some(server.url()),
            Duration::from_secs(5),
            RetryPolicy::new(2, 1),
        )
        .unwrap();
        notifier.notify(&sample()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sink_fire_does_not_propagate_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(503).create_async().await;
        let notifier = WebhookNotifier::new(
            format!("{}/hook", server.url()),
            Duration::from_secs(5),
            RetryPolicy::new(1, 1),
        )
        .unwrap();

        let sink = NotificationSink::new(vec![Arc::new(notifier)]);
        for handle in sink.fire(sample()) {
            handle.await.unwrap();
        }
    }
}
