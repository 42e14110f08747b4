//! Running latency and uptime statistics for watch mode.
//!
//! Latencies are folded into a t-digest in batches so long watch sessions
//! keep constant memory while still reporting percentiles.

use std::time::Duration;

use tdigests::{Centroid, TDigest};

/// Centroid budget after each fold.
const DIGEST_SIZE: usize = 100;

/// Samples buffered before they are folded into the digest.
const FOLD_THRESHOLD: usize = 64;

/// Per-target counters accumulated across cycles.
#[derive(Default)]
pub struct RunningStats {
    checks: u64,
    successes: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    digest: Option<TDigest>,
    pending: Vec<f64>,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe outcome.
    pub fn record(&mut self, success: bool, latency: Duration) {
        self.checks += 1;
        if success {
            self.successes += 1;
        }
        self.total += latency;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));

        self.pending.push(latency.as_secs_f64() * 1000.0);
        if self.pending.len() >= FOLD_THRESHOLD {
            let pending = std::mem::take(&mut self.pending);
            self.digest = Some(fold(self.digest.as_ref(), pending));
        }
    }

    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Snapshot the counters for `target`.
    pub fn summarize(&self, target: &str) -> TargetSummary {
        let failures = self.checks - self.successes;
        let uptime = if self.checks == 0 {
            0.0
        } else {
            self.successes as f64 / self.checks as f64 * 100.0
        };
        let avg = if self.checks == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total.as_nanos() / u128::from(self.checks)) as u64)
        };

        let quantiles = if self.checks == 0 {
            None
        } else {
            let digest = fold(self.digest.as_ref(), self.pending.clone());
            Some([0.5, 0.95, 0.99].map(|q| ms_to_duration(digest.estimate_quantile(q))))
        };
        let [p50, p95, p99] = quantiles.unwrap_or([Duration::ZERO; 3]);

        TargetSummary {
            target: target.to_string(),
            checks: self.checks,
            successes: self.successes,
            failures,
            uptime,
            avg,
            min: self.min.unwrap_or_default(),
            max: self.max.unwrap_or_default(),
            p50,
            p95,
            p99,
        }
    }
}

/// Merge new millisecond samples into an existing digest.
fn fold(digest: Option<&TDigest>, values: Vec<f64>) -> TDigest {
    let mut centroids: Vec<Centroid> = digest
        .map(|td| td.centroids().iter().map(|c| Centroid::new(c.mean, c.weight)).collect())
        .unwrap_or_default();
    if !values.is_empty() {
        let batch = TDigest::from_values(values);
        centroids.extend(batch.centroids().iter().map(|c| Centroid::new(c.mean, c.weight)));
    }
    centroids.sort_by(|a, b| a.mean.total_cmp(&b.mean));

    let mut merged = TDigest::from_centroids(centroids);
    merged.compress(DIGEST_SIZE);
    merged
}

fn ms_to_duration(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Final per-target report for a watch session.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub target: String,
    pub checks: u64,
    pub successes: u64,
    pub failures: u64,
    /// Percentage of successful checks, 0 when nothing ran.
    pub uptime: f64,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}
