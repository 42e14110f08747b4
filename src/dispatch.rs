//! Bounded fan-out of probes over a target list.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::probe::{ProbeError, ProbeOptions, ProbeResult, Prober};

/// Probe every target with at most `concurrency` probes in flight.
///
/// Results line up index-for-index with `targets`.
pub async fn check_targets(targets: &[String], options: &ProbeOptions, concurrency: usize) -> Vec<ProbeResult> {
    let prober = match Prober::new(options.clone()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::error!("Failed to initialize probes: {}", e);
            return targets
                .iter()
                .map(|t| ProbeResult::failed(t, e.clone(), Duration::ZERO))
                .collect();
        }
    };
    check_with(targets, &prober, concurrency).await
}

/// Like [`check_targets`] but reuses an existing prober.
pub async fn check_with(targets: &[String], prober: &Arc<Prober>, concurrency: usize) -> Vec<ProbeResult> {
    let prober = prober.clone();
    dispatch(targets, concurrency, move |target| {
        let prober = prober.clone();
        async move { prober.probe(&target).await }
    })
    .await
}

/// Spawn one task per target, gated by a counting semaphore.
///
/// Tasks are spawned eagerly; each waits for a permit before running
/// `probe`, and the permit is released when the task ends. A task that
/// panics yields a failed result in its slot.
pub async fn dispatch<F, Fut>(targets: &[String], concurrency: usize, probe: F) -> Vec<ProbeResult>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProbeResult> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let probe = Arc::new(probe);

    let handles: Vec<_> = targets
        .iter()
        .cloned()
        .map(|target| {
            let semaphore = semaphore.clone();
            let probe = probe.clone();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        return ProbeResult::failed(&target, ProbeError::Task(e.to_string()), Duration::ZERO)
                    }
                };
                probe(target).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (handle, target) in handles.into_iter().zip(targets) {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::error!("Probe task for {} failed: {}", target, e);
                results.push(ProbeResult::failed(target, ProbeError::Task(e.to_string()), Duration::ZERO));
            }
        }
    }
    results
}
