//! Punch - concurrent endpoint health checks.
//!
//! Probes HTTP(S), TCP, DNS, and TLS targets in parallel, either once
//! (`check`) or on an interval with webhook alerting (`watch`).

pub mod alert;
pub mod config;
pub mod dispatch;
pub mod output;
pub mod probe;
pub mod scheduler;

pub use dispatch::check_targets;
pub use probe::{run_probe, ProbeError, ProbeOptions, ProbeResult, Prober};
pub use scheduler::{WatchConfig, WatchScheduler, WatchSummary};

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    /// Serve `router` on an ephemeral localhost port.
    pub async fn spawn_server(router: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}
