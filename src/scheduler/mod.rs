//! Scheduler module for repeated watch cycles.

mod stats;

pub use stats::*;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertDispatcher, HealthEvent, HealthTracker, Recovery};
use crate::dispatch::check_with;
use crate::probe::{ProbeError, ProbeOptions, ProbeResult, Prober};

/// Maximum alert deliveries in flight at once.
pub const ALERT_SLOTS: usize = 16;

/// Shortest accepted interval between cycles.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Settings for a watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub targets: Vec<String>,
    pub options: ProbeOptions,
    pub interval: Duration,
    pub concurrency: usize,
}

/// Outcome of a watch session.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSummary {
    pub cycles: u64,
    /// One entry per target, in input order.
    pub targets: Vec<TargetSummary>,
}

enum Notice {
    Alert(Alert),
    Recovery(Recovery),
}

/// Runs a check cycle per interval tick until cancelled.
pub struct WatchScheduler {
    config: WatchConfig,
    prober: Arc<Prober>,
    alerts: Option<Arc<AlertDispatcher>>,
    alert_slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl WatchScheduler {
    pub fn new(config: WatchConfig, cancel: CancellationToken) -> Result<Self, ProbeError> {
        let prober = Arc::new(Prober::new(config.options.clone())?);
        Ok(Self::with_prober(config, prober, cancel))
    }

    /// Repeated targets are watched once, at their first position.
    pub fn with_prober(mut config: WatchConfig, prober: Arc<Prober>, cancel: CancellationToken) -> Self {
        let listed = config.targets.len();
        let mut seen = HashSet::new();
        config.targets.retain(|t| seen.insert(t.clone()));
        if config.targets.len() < listed {
            tracing::debug!("Ignoring {} repeated targets", listed - config.targets.len());
        }

        Self {
            config,
            prober,
            alerts: None,
            alert_slots: Arc::new(Semaphore::new(ALERT_SLOTS)),
            cancel,
        }
    }

    /// Route health events to `alerts`.
    pub fn with_alerts(mut self, alerts: Arc<AlertDispatcher>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Run cycles until the cancellation token fires.
    ///
    /// The first cycle starts immediately. `on_cycle` sees each cycle's
    /// results in input order. Cancellation is only observed between
    /// cycles, so a running cycle always completes.
    pub async fn run<F>(self, mut on_cycle: F) -> WatchSummary
    where
        F: FnMut(&[ProbeResult]),
    {
        let targets = &self.config.targets;
        let mut stats: Vec<RunningStats> = targets.iter().map(|_| RunningStats::new()).collect();
        let mut tracker = HealthTracker::new();
        let mut cycles = 0u64;

        let mut interval = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Watching {} targets every {:?}",
            targets.len(),
            self.config.interval
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("Watch stopped after {} cycles", cycles);
                    break;
                }
                _ = interval.tick() => {
                    let results = check_with(targets, &self.prober, self.config.concurrency).await;
                    cycles += 1;

                    for (result, stat) in results.iter().zip(stats.iter_mut()) {
                        stat.record(result.success, result.duration);
                        if let Some(event) = tracker.observe(&result.target, result.success) {
                            self.notify(event, result);
                        }
                    }

                    on_cycle(&results);
                }
            }
        }

        WatchSummary {
            cycles,
            targets: targets
                .iter()
                .zip(&stats)
                .map(|(target, stat)| stat.summarize(target))
                .collect(),
        }
    }

    /// Hand a health event to a detached delivery task.
    ///
    /// The task waits for an alert slot, so events queue rather than block
    /// the cycle.
    fn notify(&self, event: HealthEvent, result: &ProbeResult) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        if !alerts.is_enabled() {
            return;
        }

        let notice = match event {
            HealthEvent::Alert => Notice::Alert(Alert::from_result(result, Utc::now())),
            HealthEvent::Recovery => Notice::Recovery(Recovery::new(&result.target, Utc::now())),
        };

        let alerts = alerts.clone();
        let slots = self.alert_slots.clone();
        let target = result.target.clone();
        tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };

            let sent = match &notice {
                Notice::Alert(alert) => alerts.send_alert(alert).await,
                Notice::Recovery(recovery) => alerts.send_recovery(recovery).await,
            };
            match sent {
                Ok(delivery) => tracing::debug!("{:?} for {}: {:?}", event, target, delivery),
                Err(e) => tracing::warn!("Failed to deliver {:?} for {}: {}", event, target, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertConfig, AlertError, MockWebhookClient, WebhookConfig, ALERT_COLOR, RECOVERY_COLOR};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn watch_config(targets: &[&str], interval: Duration) -> WatchConfig {
        WatchConfig {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            options: ProbeOptions {
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
            interval,
            concurrency: 4,
        }
    }

    fn alert_config() -> AlertConfig {
        AlertConfig {
            enabled: true,
            cooldown: Duration::from_secs(300),
            webhook: Some(WebhookConfig::new("https://hooks.example.com/punch")),
        }
    }

    /// Stop the scheduler after `n` cycles.
    fn stop_after(n: usize, cancel: &CancellationToken) -> impl FnMut(&[ProbeResult]) {
        let cancel = cancel.clone();
        let mut seen = 0;
        move |_| {
            seen += 1;
            if seen >= n {
                cancel.cancel();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_immediate_then_per_interval() {
        let cancel = CancellationToken::new();
        let scheduler =
            WatchScheduler::new(watch_config(&["dns://127.0.0.1"], Duration::from_secs(30)), cancel.clone()).unwrap();

        let start = Instant::now();
        let mut ticks = Vec::new();
        let mut stop = stop_after(3, &cancel);
        let summary = scheduler
            .run(|results| {
                ticks.push(Instant::now() - start);
                stop(results);
            })
            .await;

        assert_eq!(summary.cycles, 3);
        assert_eq!(
            ticks,
            vec![Duration::ZERO, Duration::from_secs(30), Duration::from_secs(60)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick_returns_empty_summary() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler =
            WatchScheduler::new(watch_config(&["dns://127.0.0.1"], Duration::from_secs(5)), cancel).unwrap();

        let summary = scheduler.run(|_| panic!("no cycle expected")).await;
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.targets.len(), 1);
        assert_eq!(summary.targets[0].checks, 0);
        assert_eq!(summary.targets[0].uptime, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_in_input_order_with_uptime() {
        let cancel = CancellationToken::new();
        let config = watch_config(&["dns://127.0.0.1", "http://", "dns://10.0.0.1"], Duration::from_secs(5));
        let scheduler = WatchScheduler::new(config, cancel.clone()).unwrap();

        let summary = scheduler.run(stop_after(4, &cancel)).await;

        let names: Vec<&str> = summary.targets.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(names, vec!["dns://127.0.0.1", "http://", "dns://10.0.0.1"]);
        for s in &summary.targets {
            assert_eq!(s.checks, 4);
        }
        assert_eq!(summary.targets[0].uptime, 100.0);
        assert_eq!(summary.targets[1].uptime, 0.0);
        assert_eq!(summary.targets[1].failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_passed_to_callback_in_order() {
        let cancel = CancellationToken::new();
        let config = watch_config(&["http://", "dns://127.0.0.1"], Duration::from_secs(5));
        let scheduler = WatchScheduler::new(config, cancel.clone()).unwrap();

        let mut seen = Vec::new();
        let mut stop = stop_after(1, &cancel);
        scheduler
            .run(|results| {
                seen = results.iter().map(|r| (r.target.clone(), r.success)).collect();
                stop(results);
            })
            .await;

        assert_eq!(
            seen,
            vec![("http://".to_string(), false), ("dns://127.0.0.1".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_alerts_once_within_cooldown() {
        let mut mock = MockWebhookClient::new();
        mock.expect_deliver()
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(204) }));
        let alerts = Arc::new(AlertDispatcher::with_client(alert_config(), Arc::new(mock)));

        let cancel = CancellationToken::new();
        let scheduler = WatchScheduler::new(watch_config(&["http://"], Duration::from_secs(5)), cancel.clone())
            .unwrap()
            .with_alerts(alerts.clone());

        scheduler.run(stop_after(3, &cancel)).await;
        // Let the detached delivery tasks finish.
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(alerts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_targets_never_alert() {
        let mut mock = MockWebhookClient::new();
        mock.expect_deliver().never();
        let alerts = Arc::new(AlertDispatcher::with_client(alert_config(), Arc::new(mock)));

        let cancel = CancellationToken::new();
        let scheduler = WatchScheduler::new(watch_config(&["dns://127.0.0.1"], Duration::from_secs(5)), cancel.clone())
            .unwrap()
            .with_alerts(alerts);

        let summary = scheduler.run(stop_after(3, &cancel)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(summary.targets[0].successes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_does_not_disturb_cycles() {
        let mut mock = MockWebhookClient::new();
        mock.expect_deliver()
            .returning(|_, _, _| Box::pin(async { Err(AlertError::Transport("refused".to_string())) }));
        let config = AlertConfig {
            cooldown: Duration::ZERO,
            ..alert_config()
        };
        let alerts = Arc::new(AlertDispatcher::with_client(config, Arc::new(mock)));

        let cancel = CancellationToken::new();
        let scheduler = WatchScheduler::new(watch_config(&["http://"], Duration::from_secs(5)), cancel.clone())
            .unwrap()
            .with_alerts(alerts);

        let summary = scheduler.run(stop_after(5, &cancel)).await;
        assert_eq!(summary.cycles, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_targets_are_watched_once() {
        let cancel = CancellationToken::new();
        let config = watch_config(&["dns://127.0.0.1", "http://", "dns://127.0.0.1"], Duration::from_secs(5));
        let scheduler = WatchScheduler::new(config, cancel.clone()).unwrap();

        let mut widths = Vec::new();
        let mut stop = stop_after(2, &cancel);
        let summary = scheduler
            .run(|results| {
                widths.push(results.len());
                stop(results);
            })
            .await;

        assert_eq!(widths, vec![2, 2]);
        let names: Vec<&str> = summary.targets.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(names, vec!["dns://127.0.0.1", "http://"]);
        assert_eq!(summary.targets[0].checks, 2);
    }

    #[tokio::test]
    async fn test_every_event_delivered_when_slots_are_busy() {
        const TARGETS: usize = ALERT_SLOTS + 4;

        // Reserve ports, then leave them closed for the first cycle.
        let reserved: Vec<_> = (0..TARGETS)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let addrs: Vec<_> = reserved.iter().map(|l| l.local_addr().unwrap()).collect();
        drop(reserved);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let mut mock = MockWebhookClient::new();
        mock.expect_deliver().returning(move |_, _, payload| {
            let embed = &payload.embeds[0];
            let entry = (embed.color, embed.description.lines().next().unwrap_or_default().to_string());
            let sink = sink.clone();
            Box::pin(async move {
                // Hold the slot long enough for the next cycle to queue behind it.
                tokio::time::sleep(Duration::from_millis(200)).await;
                sink.lock().unwrap().push(entry);
                Ok(200)
            })
        });
        let alerts = Arc::new(AlertDispatcher::with_client(alert_config(), Arc::new(mock)));

        let cancel = CancellationToken::new();
        let config = WatchConfig {
            targets: addrs.iter().map(|a| format!("tcp://{}", a)).collect(),
            concurrency: TARGETS,
            ..watch_config(&[], Duration::from_millis(50))
        };
        let scheduler = WatchScheduler::new(config, cancel.clone()).unwrap().with_alerts(alerts);

        let mut outcomes = Vec::new();
        let mut listeners = Vec::new();
        scheduler
            .run(|results| {
                outcomes.push(results.iter().filter(|r| r.success).count());
                if listeners.is_empty() {
                    listeners = addrs.iter().map(|a| std::net::TcpListener::bind(a).unwrap()).collect();
                } else {
                    cancel.cancel();
                }
            })
            .await;
        assert_eq!(outcomes, vec![0, TARGETS]);

        // Two events per target, at most ALERT_SLOTS at a time.
        let deadline = Instant::now() + Duration::from_secs(5);
        while delivered.lock().unwrap().len() < 2 * TARGETS && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let delivered = delivered.lock().unwrap().clone();
        let alerted: HashSet<_> = delivered.iter().filter(|(c, _)| *c == ALERT_COLOR).map(|(_, t)| t).collect();
        let recovered: HashSet<_> = delivered.iter().filter(|(c, _)| *c == RECOVERY_COLOR).map(|(_, t)| t).collect();
        assert_eq!(delivered.len(), 2 * TARGETS);
        assert_eq!(alerted.len(), TARGETS);
        assert_eq!(recovered, alerted);
    }

    #[tokio::test]
    async fn test_recovery_sent_when_target_comes_back() {
        // Reserve a port, then leave it closed for the first cycle.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let colors = Arc::new(Mutex::new(Vec::new()));
        let sink = colors.clone();
        let mut mock = MockWebhookClient::new();
        mock.expect_deliver().returning(move |_, _, payload| {
            sink.lock().unwrap().push(payload.embeds[0].color);
            Box::pin(async { Ok(200) })
        });
        let alerts = Arc::new(AlertDispatcher::with_client(alert_config(), Arc::new(mock)));

        let cancel = CancellationToken::new();
        let config = WatchConfig {
            targets: vec![format!("tcp://{}", addr)],
            ..watch_config(&[], Duration::from_millis(50))
        };
        let scheduler = WatchScheduler::new(config, cancel.clone()).unwrap().with_alerts(alerts);

        let mut outcomes = Vec::new();
        let mut reopened = None;
        scheduler
            .run(|results| {
                outcomes.push(results[0].success);
                if reopened.is_none() {
                    reopened = Some(std::net::TcpListener::bind(addr).unwrap());
                } else {
                    cancel.cancel();
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(outcomes, vec![false, true]);
        let colors = colors.lock().unwrap().clone();
        assert_eq!(colors, vec![ALERT_COLOR, RECOVERY_COLOR]);
    }
}
