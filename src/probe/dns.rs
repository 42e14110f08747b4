//! DNS resolution probe.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::{ProbeError, ProbeResult};

/// Resolve `host` and report how many distinct addresses it has.
///
/// Succeeds when at least one address comes back before the timeout.
pub async fn run_dns_probe(target: &str, host: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let lookup = tokio::time::timeout(timeout, resolve(host)).await;
    let duration = start.elapsed();

    let addrs = match lookup {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => return ProbeResult::failed(target, e, duration),
        Err(_) => return ProbeResult::failed(target, ProbeError::Timeout(timeout), duration),
    };

    if addrs.is_empty() {
        return ProbeResult::failed(
            target,
            ProbeError::Resolve(format!("no addresses found for {}", host)),
            duration,
        );
    }

    tracing::debug!("DNS {} -> {:?} ({:?})", host, addrs, duration);
    ProbeResult {
        target: target.to_string(),
        success: true,
        info: Some(format!("{} IPs", addrs.len())),
        duration,
        ..Default::default()
    }
}

/// Resolve a hostname (or IP literal) to its distinct addresses.
async fn resolve(host: &str) -> Result<BTreeSet<IpAddr>, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(BTreeSet::from([ip]));
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", host, e)))?;

    Ok(addrs.map(|sa| sa.ip()).collect())
}
