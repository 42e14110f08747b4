//! Configuration module for punch.
//!
//! Loads an optional JSON config file. Every field may be omitted; values
//! left out fall back to built-in defaults, and command-line flags take
//! precedence over both.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::{AlertConfig, WebhookConfig, DEFAULT_WEBHOOK_METHOD};
use crate::probe::ProbeOptions;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "punch.json";

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PUNCH_CONFIG";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0:?} already exists")]
    AlreadyExists(PathBuf),
}

/// Contents of a punch config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Seconds between watch cycles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Per-probe timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_codes: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting: Option<AlertingSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSection {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_webhook_method() -> String {
    DEFAULT_WEBHOOK_METHOD.to_string()
}

impl FileConfig {
    /// Probe options from file values layered over the defaults.
    pub fn probe_options(&self) -> ProbeOptions {
        let defaults = ProbeOptions::default();
        ProbeOptions {
            timeout: self.timeout.map(Duration::from_secs).unwrap_or(defaults.timeout),
            method: self.method.clone().unwrap_or(defaults.method),
            headers: self.headers.clone(),
            body: None,
            insecure: self.insecure.unwrap_or(defaults.insecure),
            follow_redirects: self.follow_redirects.unwrap_or(defaults.follow_redirects),
            expected_codes: self.expected_codes.clone(),
            retries: self.retries.unwrap_or(defaults.retries),
        }
    }

    /// Alerting settings; disabled when the section is missing.
    pub fn alert_config(&self) -> AlertConfig {
        let Some(section) = &self.alerting else {
            return AlertConfig::default();
        };
        AlertConfig {
            enabled: section.enabled,
            cooldown: Duration::from_secs(section.cooldown_seconds),
            webhook: section.webhook.as_ref().map(|w| WebhookConfig {
                url: w.url.clone(),
                method: w.method.clone(),
            }),
        }
    }

    /// The config written by `punch init`.
    pub fn sample() -> Self {
        Self {
            urls: vec!["https://example.com".to_string()],
            interval: Some(30),
            timeout: Some(10),
            method: Some("GET".to_string()),
            headers: HashMap::from([("User-Agent".to_string(), "punch".to_string())]),
            insecure: Some(false),
            follow_redirects: Some(true),
            concurrency: Some(10),
            retries: Some(2),
            expected_codes: vec![200],
            alerting: Some(AlertingSection {
                enabled: false,
                cooldown_seconds: default_cooldown_seconds(),
                webhook: Some(WebhookSection {
                    url: "https://discord.com/api/webhooks/your-webhook-url".to_string(),
                    method: default_webhook_method(),
                }),
            }),
        }
    }
}

/// Load configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Find and load the config file, if any.
///
/// Lookup order: `explicit`, then `PUNCH_CONFIG`, then `./punch.json`.
/// The first two must load; the last is only used when present.
pub fn discover(explicit: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    discover_in(explicit, std::env::var_os(CONFIG_ENV), Path::new("."))
}

fn discover_in(
    explicit: Option<&Path>,
    from_env: Option<OsString>,
    dir: &Path,
) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    let path = match (explicit, from_env) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(path)) if !path.is_empty() => PathBuf::from(path),
        _ => {
            let fallback = dir.join(DEFAULT_CONFIG_FILE);
            if !fallback.is_file() {
                return Ok(None);
            }
            fallback
        }
    };

    tracing::info!("Loading config from {}", path.display());
    let config = load_config(&path)?;
    Ok(Some((path, config)))
}

/// Write the sample config to `path`, refusing to replace an existing file.
pub fn write_sample(path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(&FileConfig::sample()).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => return Err(io_err(e)),
    };
    file.write_all(json.as_bytes()).map_err(io_err)?;
    file.write_all(b"\n").map_err(io_err)?;
    Ok(())
}
