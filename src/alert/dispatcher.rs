//! Cooldown-throttled alert delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::{Alert, AlertError, Recovery, ReqwestWebhookClient, WebhookClient, WebhookPayload};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
pub const DEFAULT_WEBHOOK_METHOD: &str = "POST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
}

impl WebhookConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: DEFAULT_WEBHOOK_METHOD.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub enabled: bool,
    pub cooldown: Duration,
    pub webhook: Option<WebhookConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown: DEFAULT_COOLDOWN,
            webhook: None,
        }
    }
}

/// Outcome of a single send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The webhook accepted the payload with this status.
    Delivered(u16),
    /// A previous alert for the target is still inside the cooldown.
    Throttled,
    /// Alerting is disabled or no webhook is configured.
    Skipped,
}

/// Sends alerts and recoveries, throttling alerts per target.
pub struct AlertDispatcher {
    config: AlertConfig,
    client: Arc<dyn WebhookClient>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertDispatcher {
    /// Dispatcher backed by the reqwest webhook client.
    pub fn new(config: AlertConfig) -> Result<Self, AlertError> {
        Ok(Self::with_client(config, Arc::new(ReqwestWebhookClient::new()?)))
    }

    pub fn with_client(config: AlertConfig, client: Arc<dyn WebhookClient>) -> Self {
        Self {
            config,
            client,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Send an alert unless the target is inside its cooldown window.
    ///
    /// The cooldown is committed before delivery and stays committed when
    /// delivery fails.
    pub async fn send_alert(&self, alert: &Alert) -> Result<Delivery, AlertError> {
        if !self.config.enabled {
            return Ok(Delivery::Skipped);
        }
        if !self.claim_cooldown(&alert.target) {
            tracing::debug!("Alert for {} suppressed by cooldown", alert.target);
            return Ok(Delivery::Throttled);
        }

        self.deliver(&WebhookPayload::for_alert(alert)).await
    }

    /// Send a recovery notice. Recoveries ignore the cooldown.
    pub async fn send_recovery(&self, recovery: &Recovery) -> Result<Delivery, AlertError> {
        if !self.config.enabled {
            return Ok(Delivery::Skipped);
        }
        self.deliver(&WebhookPayload::for_recovery(recovery)).await
    }

    /// Record a send for `target` if its cooldown has elapsed.
    fn claim_cooldown(&self, target: &str) -> bool {
        let now = Instant::now();
        let mut last_sent = match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = last_sent.get(target) {
            if now.duration_since(*last) < self.config.cooldown {
                return false;
            }
        }
        last_sent.insert(target.to_string(), now);
        true
    }

    async fn deliver(&self, payload: &WebhookPayload) -> Result<Delivery, AlertError> {
        let Some(webhook) = &self.config.webhook else {
            return Ok(Delivery::Skipped);
        };
        let status = self.client.deliver(&webhook.method, &webhook.url, payload).await?;
        Ok(Delivery::Delivered(status))
    }
}
