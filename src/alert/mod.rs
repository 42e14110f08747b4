//! Health-state tracking and webhook alerting.

mod dispatcher;
mod tracker;
mod webhook;

pub use dispatcher::*;
pub use tracker::*;
pub use webhook::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::probe::ProbeResult;

/// Alert delivery error types.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("failed to encode webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid webhook method {0:?}")]
    Method(String),
    #[error("failed to send webhook: {0}")]
    Transport(String),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// A target went (or stayed) unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub target: String,
    pub status: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Describe a failed probe result.
    pub fn from_result(result: &ProbeResult, timestamp: DateTime<Utc>) -> Self {
        let status = match (&result.status, &result.info) {
            (Some(status), _) => status.clone(),
            (None, Some(info)) => info.clone(),
            (None, None) => "unreachable".to_string(),
        };
        let error = match (&result.error, result.status_code) {
            (Some(e), _) => Some(e.to_string()),
            (None, Some(code)) => Some(format!("unexpected status {}", code)),
            (None, None) => None,
        };

        Self {
            target: result.target.clone(),
            status,
            error,
            timestamp,
        }
    }
}

/// A previously unhealthy target is healthy again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub target: String,
    pub timestamp: DateTime<Utc>,
}

impl Recovery {
    pub const STATUS: &'static str = "Back online";

    pub fn new(target: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            target: target.to_string(),
            timestamp,
        }
    }
}
