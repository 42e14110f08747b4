//! TCP connect probe.

use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::{ProbeError, ProbeResult};

/// Open a TCP connection to `host:port` and close it immediately.
pub async fn run_tcp_probe(target: &str, host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let connect = tokio::time::timeout(timeout, TcpStream::connect((host, port))).await;
    let duration = start.elapsed();

    match connect {
        Ok(Ok(stream)) => {
            drop(stream);
            tracing::debug!("TCP {}:{} open ({:?})", host, port, duration);
            ProbeResult {
                target: target.to_string(),
                success: true,
                info: Some("Open".to_string()),
                duration,
                ..Default::default()
            }
        }
        Ok(Err(e)) => ProbeResult::failed(
            target,
            ProbeError::Connect(format!("{}:{}: {}", host, port, e)),
            duration,
        ),
        Err(_) => ProbeResult::failed(target, ProbeError::Timeout(timeout), duration),
    }
}
