//! Webhook notifications for status changes.
//!
//! The [`WebhookDispatcher`] reads notable [`TargetStatus`] updates, usually
//! forwarded from a monitor's updates channel, and POSTs a JSON payload to
//! every configured endpoint that accepts the update's type.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::status::TargetStatus;

pub const SIGNATURE_HEADER: &str = "X-Avamon-Signature-256";

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The URL to POST payloads to.
    pub url: String,

    /// Which notification types to deliver (`status_up`, `status_down`).
    /// Empty means all.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    /// Optional HMAC-SHA256 signing secret for the signature header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_retries(),
            secret: None,
        }
    }

    pub fn accepts(&self, notification_type: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events.iter().any(|e| e == notification_type)
    }
}

/// `status_up` for OK updates, `status_down` for everything else.
pub fn notification_type(update: &TargetStatus) -> &'static str {
    if update.status.is_ok() {
        "status_up"
    } else {
        "status_down"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadTarget {
    pub id: u64,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadStatus {
    /// Display name of the status type, e.g. `"DNS Error"`.
    #[serde(rename = "type")]
    pub status_type: String,
    pub error: Option<String>,
    pub response_time_ms: u64,
    pub http_status_code: Option<u16>,
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub target: PayloadTarget,
    pub status: PayloadStatus,
    /// One-line human readable description of the change.
    pub summary: String,
}

impl WebhookPayload {
    pub fn from_update(update: &TargetStatus) -> Self {
        let TargetStatus { target, status } = update;
        Self {
            version: 1,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            notification_type: notification_type(update).to_string(),
            target: PayloadTarget {
                id: target.id,
                title: target.title.clone(),
                url: target.url.clone(),
            },
            status: PayloadStatus {
                status_type: status.status_type.as_str().to_string(),
                error: status.error.clone(),
                response_time_ms: status.response_time.as_millis() as u64,
                http_status_code: status.http_status_code,
            },
            summary: summary(update),
        }
    }
}

fn summary(update: &TargetStatus) -> String {
    let TargetStatus { target, status } = update;
    match &status.error {
        Some(error) if !status.is_ok() => {
            format!("{}: {} ({})", target.title, status.status_type, error)
        }
        _ => format!("{}: {}", target.title, status.status_type),
    }
}

/// Asynchronous webhook dispatcher.
///
/// Spawned as a background tokio task, it reads updates from the channel
/// and POSTs payloads to all configured webhook endpoints.
pub struct WebhookDispatcher {
    rx: mpsc::Receiver<TargetStatus>,
    webhooks: Vec<WebhookConfig>,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(
        rx: mpsc::Receiver<TargetStatus>,
        webhooks: Vec<WebhookConfig>,
        client: Client,
    ) -> Self {
        Self {
            rx,
            webhooks,
            client,
        }
    }

    /// Run the dispatcher loop. Returns when all senders are dropped.
    pub async fn run(mut self) {
        debug!(
            webhook_count = self.webhooks.len(),
            "Webhook dispatcher started"
        );

        while let Some(update) = self.rx.recv().await {
            let payload = WebhookPayload::from_update(&update);
            let notification_type = payload.notification_type.as_str();

            let json_bytes = match serde_json::to_vec(&payload) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize webhook payload");
                    continue;
                }
            };

            for wh in &self.webhooks {
                if !wh.accepts(notification_type) {
                    continue;
                }

                let timeout = Duration::from_millis(wh.timeout_ms);

                if let Err(e) = deliver(
                    &self.client,
                    &wh.url,
                    &json_bytes,
                    wh.secret.as_deref(),
                    timeout,
                    wh.max_retries,
                )
                .await
                {
                    warn!(
                        url = %wh.url,
                        target_id = update.target.id,
                        notification_type,
                        error = %e,
                        "Webhook delivery failed"
                    );
                } else {
                    debug!(url = %wh.url, target_id = update.target.id, notification_type, "Webhook delivered");
                }
            }
        }

        debug!("Webhook dispatcher shutting down");
    }
}

async fn deliver(
    client: &Client,
    url: &str,
    body: &[u8],
    secret: Option<&str>,
    timeout: Duration,
    max_retries: u32,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying webhook");
            tokio::time::sleep(backoff).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("avamon/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .body(body.to_vec());

        if let Some(secret) = secret {
            let signature = sign_payload(body, secret);
            req = req.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status();
                last_error = format!("HTTP {} from {}", status, url);
                if status.is_client_error() && status.as_u16() != 429 {
                    return Err(last_error);
                }
            }
            Err(e) => {
                last_error = format!("Request to {} failed: {}", url, e);
            }
        }
    }

    Err(last_error)
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
