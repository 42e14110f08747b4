//! Probe module for health checks.
//!
//! Supports HTTP(S), TCP, DNS, and TLS certificate probes. A raw target
//! string is routed to the matching probe by its scheme prefix.

mod dns;
mod http;
mod retry;
mod target;
mod tcp;
mod tls;

pub use dns::*;
pub use http::*;
pub use retry::*;
pub use target::*;
pub use tcp::*;
pub use tls::*;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("dns resolution failed: {0}")]
    Resolve(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("no certificates presented by peer")]
    NoCertificate,
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Per-cycle probe options shared by every target in a run.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub insecure: bool,
    pub follow_redirects: bool,
    pub expected_codes: Vec<u16>,
    /// Extra attempts after the first; only HTTP probes retry.
    pub retries: u32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            insecure: false,
            follow_redirects: true,
            expected_codes: Vec::new(),
            retries: 0,
        }
    }
}

/// Normalized outcome of a single probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    /// The target exactly as supplied by the caller.
    pub target: String,
    pub success: bool,
    pub status_code: Option<u16>,
    /// Status line such as `503 Service Unavailable`.
    pub status: Option<String>,
    /// Protocol-specific summary (`Open`, `3 IPs`, `Valid (42 days)`).
    pub info: Option<String>,
    pub duration: Duration,
    /// Drained body size, HTTP only.
    pub size: Option<u64>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub error: Option<ProbeError>,
    /// Zero-based index of the attempt that produced this result.
    pub attempt: u32,
    pub certificate: Option<CertificateInfo>,
}

impl ProbeResult {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Default::default()
        }
    }

    /// A failed result carrying an error.
    pub fn failed(target: &str, error: ProbeError, duration: Duration) -> Self {
        Self {
            target: target.to_string(),
            success: false,
            duration,
            error: Some(error),
            ..Default::default()
        }
    }

    /// Text for the "code/info" column: status code first, then info.
    pub fn code_or_info(&self) -> Option<String> {
        match (self.status_code, &self.info) {
            (Some(code), _) => Some(code.to_string()),
            (None, Some(info)) => Some(info.clone()),
            (None, None) => None,
        }
    }
}

/// Routes targets to protocol probes.
///
/// Holds the pieces that are expensive to build (HTTP client, TLS verifier)
/// so a whole cycle shares them.
pub struct Prober {
    options: ProbeOptions,
    http: reqwest::Client,
    tls: TlsProbe,
}

impl Prober {
    /// Create a prober that verifies certificates against the Mozilla roots.
    pub fn new(options: ProbeOptions) -> Result<Self, ProbeError> {
        let tls = TlsProbe::with_webpki_roots()?;
        Self::with_tls(options, tls)
    }

    /// Create a prober with a custom TLS certificate probe.
    pub fn with_tls(options: ProbeOptions, tls: TlsProbe) -> Result<Self, ProbeError> {
        let http = build_http_client(&options)?;
        Ok(Self { options, http, tls })
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Run the probe matching the target's scheme.
    pub async fn probe(&self, raw: &str) -> ProbeResult {
        let target = match parse_target(raw) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Rejecting target {}: {}", raw, e);
                return ProbeResult::failed(raw, e, Duration::ZERO);
            }
        };

        let timeout = self.options.timeout;
        match target {
            Target::Http(url) => {
                run_with_retries(self.options.retries, |attempt| {
                    tracing::debug!("HTTP probe {} attempt {}", url, attempt);
                    run_http_probe(&self.http, raw, &url, &self.options)
                })
                .await
            }
            Target::Tcp { host, port } => run_tcp_probe(raw, &host, port, timeout).await,
            Target::Dns { host } => run_dns_probe(raw, &host, timeout).await,
            Target::Tls { host, port } => self.tls.probe(raw, &host, port, timeout).await,
        }
    }
}

/// Probe a single target with freshly built probe state.
pub async fn run_probe(raw: &str, options: &ProbeOptions) -> ProbeResult {
    match Prober::new(options.clone()) {
        Ok(prober) => prober.probe(raw).await,
        Err(e) => ProbeResult::failed(raw, e, Duration::ZERO),
    }
}
