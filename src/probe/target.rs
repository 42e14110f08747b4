//! Target classification by scheme prefix.

use url::Url;

use super::ProbeError;

pub const TCP_PREFIX: &str = "tcp://";
pub const DNS_PREFIX: &str = "dns://";
pub const TLS_PREFIX: &str = "ssl://";

const DEFAULT_TCP_PORT: u16 = 80;
const DEFAULT_TLS_PORT: u16 = 443;

/// A parsed target, one variant per probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Http(Url),
    Tcp { host: String, port: u16 },
    Dns { host: String },
    Tls { host: String, port: u16 },
}

impl Target {
    pub fn protocol(&self) -> &'static str {
        match self {
            Target::Http(_) => "http",
            Target::Tcp { .. } => "tcp",
            Target::Dns { .. } => "dns",
            Target::Tls { .. } => "ssl",
        }
    }
}

/// Classify a raw target string.
///
/// `tcp://`, `dns://` and `ssl://` select their probes; anything else is
/// HTTP, with `https://` assumed when no HTTP scheme is present.
pub fn parse_target(raw: &str) -> Result<Target, ProbeError> {
    let trimmed = raw.trim();

    if trimmed.starts_with(TCP_PREFIX) {
        let (host, port) = host_and_port(raw, trimmed, DEFAULT_TCP_PORT)?;
        return Ok(Target::Tcp { host, port });
    }

    if trimmed.starts_with(DNS_PREFIX) {
        let url = parse_url(raw, trimmed)?;
        let host = host_of(raw, &url)?;
        return Ok(Target::Dns { host });
    }

    if trimmed.starts_with(TLS_PREFIX) {
        let (host, port) = host_and_port(raw, trimmed, DEFAULT_TLS_PORT)?;
        return Ok(Target::Tls { host, port });
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = parse_url(raw, &with_scheme)?;
    host_of(raw, &url)?;
    Ok(Target::Http(url))
}

fn parse_url(raw: &str, candidate: &str) -> Result<Url, ProbeError> {
    Url::parse(candidate).map_err(|e| invalid(raw, e.to_string()))
}

fn host_and_port(raw: &str, candidate: &str, default_port: u16) -> Result<(String, u16), ProbeError> {
    let url = parse_url(raw, candidate)?;
    let host = host_of(raw, &url)?;
    Ok((host, url.port().unwrap_or(default_port)))
}

/// Host without IPv6 brackets, so it can be handed to the resolver.
fn host_of(raw: &str, url: &Url) -> Result<String, ProbeError> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string()),
        _ => Err(invalid(raw, "missing host".to_string())),
    }
}

fn invalid(raw: &str, reason: String) -> ProbeError {
    ProbeError::InvalidTarget {
        target: raw.to_string(),
        reason,
    }
}
