//! Webhook payloads and the HTTP client that posts them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{Alert, AlertError, Recovery};

pub const ALERT_COLOR: u32 = 16_711_680;
pub const RECOVERY_COLOR: u32 = 65_280;
pub const ALERT_TITLE: &str = "🚨 Punch Alert";
pub const RECOVERY_TITLE: &str = "✅ Punch Recovery";
pub const FOOTER_TEXT: &str = "Punch Monitoring";

/// Send timeout for a single webhook request.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Embed-style webhook body (Discord compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    pub footer: Footer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footer {
    pub text: String,
}

impl WebhookPayload {
    pub fn for_alert(alert: &Alert) -> Self {
        let mut description = describe(&alert.target, &alert.status);
        if let Some(error) = &alert.error {
            description.push_str(&format!("\n**Error:** {}", error));
        }
        Self::single(ALERT_TITLE, description, ALERT_COLOR, alert.timestamp)
    }

    pub fn for_recovery(recovery: &Recovery) -> Self {
        Self::single(
            RECOVERY_TITLE,
            describe(&recovery.target, Recovery::STATUS),
            RECOVERY_COLOR,
            recovery.timestamp,
        )
    }

    fn single(title: &str, description: String, color: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            embeds: vec![Embed {
                title: title.to_string(),
                description,
                color,
                timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                footer: Footer {
                    text: FOOTER_TEXT.to_string(),
                },
            }],
        }
    }
}

fn describe(target: &str, status: &str) -> String {
    format!("**Target:** {}\n**Status:** {}", target, status)
}

/// Abstraction over webhook delivery for testability.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait WebhookClient: Send + Sync {
    /// Send `payload` as JSON; returns the response status on 2xx.
    async fn deliver(&self, method: &str, url: &str, payload: &WebhookPayload) -> Result<u16, AlertError>;
}

/// Production webhook client using reqwest.
pub struct ReqwestWebhookClient {
    client: reqwest::Client,
}

impl ReqwestWebhookClient {
    pub fn new() -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn deliver(&self, method: &str, url: &str, payload: &WebhookPayload) -> Result<u16, AlertError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AlertError::Method(method.to_string()))?;
        let body = serde_json::to_vec(payload)?;

        tracing::debug!("{} webhook {}", method, url);
        let response = self
            .client
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}
