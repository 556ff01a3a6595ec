//! Heart monitor: periodic, bounded-concurrency sweep over all tracked
//! clusters.
//!
//! The first sweep runs as soon as the monitor starts. A tick that arrives
//! while the previous sweep is still running is skipped, so at most one
//! sweep (and therefore at most one probe per cluster) is ever in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clustermon_client::{ClusterConnector, DEFAULT_REQUEST_TIMEOUT};
use clustermon_core::{MonitorStats, SweepReport};
use clustermon_state::{HeartIssue, Store, TrackedCluster};

use crate::checker::probe_cluster;

fn record(report: &mut SweepReport, issue: HeartIssue) {
    report.probed += 1;
    match issue {
        HeartIssue::None => report.healthy += 1,
        HeartIssue::BadAuth => report.bad_auth += 1,
        HeartIssue::NoConnection => report.no_connection += 1,
        HeartIssue::UuidMismatch => report.uuid_mismatch += 1,
    }
}

/// Shared by the driver task and every probe task.
#[derive(Clone)]
struct Sweeper {
    store: Arc<dyn Store>,
    connector: Arc<dyn ClusterConnector>,
    max_workers: usize,
    probe_timeout: Duration,
    stats: Arc<MonitorStats>,
}

/// Handle to a running sweep loop.
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps every tracked cluster's heart issue current.
pub struct HeartMonitor {
    sweeper: Sweeper,
    running: Mutex<Option<Running>>,
}

impl HeartMonitor {
    /// Create a monitor running at most `max_workers` probes at once.
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn ClusterConnector>,
        max_workers: usize,
    ) -> Self {
        Self {
            sweeper: Sweeper {
                store,
                connector,
                max_workers: max_workers.max(1),
                probe_timeout: DEFAULT_REQUEST_TIMEOUT,
                stats: Arc::new(MonitorStats::new()),
            },
            running: Mutex::new(None),
        }
    }

    /// Deadline for probing a single cluster.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.sweeper.probe_timeout = timeout;
        self
    }

    /// Publish sweep results into `stats`.
    pub fn with_stats(mut self, stats: Arc<MonitorStats>) -> Self {
        self.sweeper.stats = stats;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.sweeper.max_workers
    }

    /// Start sweeping every `interval`. Returns `false` (and does nothing)
    /// if the monitor is already running.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut running) = self.running.lock() else {
            error!("heart monitor state poisoned");
            return false;
        };
        if running.is_some() {
            debug!("heart monitor already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive_sweeps(
            self.sweeper.clone(),
            interval,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });

        info!(
            ?interval,
            max_workers = self.sweeper.max_workers,
            "heart monitor started"
        );
        true
    }

    /// Cancel the loop and wait for the in-flight sweep and its probes.
    /// Safe to call when never started.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => {
                error!("heart monitor state poisoned");
                return;
            }
        };
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "heart monitor task ended abnormally");
        }
        info!("heart monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Run a single sweep to completion, outside the periodic loop.
    pub async fn sweep_once(&self) -> SweepReport {
        Arc::new(self.sweeper.clone())
            .sweep(CancellationToken::new())
            .await
    }
}

async fn drive_sweeps(sweeper: Sweeper, interval: Duration, cancel: CancellationToken) {
    let sweeper = Arc::new(sweeper);
    // The first tick completes immediately.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<SweepReport>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|sweep| !sweep.is_finished()) {
                    debug!("previous sweep still running, skipping tick");
                    continue;
                }
                let sweeper = sweeper.clone();
                let cancel = cancel.clone();
                in_flight = Some(tokio::spawn(async move { sweeper.sweep(cancel).await }));
            }
        }
    }

    if let Some(sweep) = in_flight {
        if let Err(e) = sweep.await {
            warn!(error = %e, "sweep task ended abnormally");
        }
    }
}

impl Sweeper {
    async fn sweep(self: Arc<Self>, cancel: CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();

        let clusters = match self.store.get_clusters(true, false) {
            Ok(clusters) => clusters,
            Err(e) => {
                error!(error = %e, "could not list clusters, skipping sweep");
                return report;
            }
        };
        debug!(clusters = clusters.len(), "sweep started");

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut probes = JoinSet::new();

        for cluster in clusters {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let sweeper = self.clone();
            let cancel = cancel.clone();
            probes.spawn(async move {
                let _permit = permit;
                sweeper.probe_and_record(cluster, cancel).await
            });
        }

        while let Some(result) = probes.join_next().await {
            match result {
                Ok(Some((issue, stored))) => {
                    record(&mut report, issue);
                    if !stored {
                        report.store_errors += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "probe task ended abnormally"),
            }
        }

        debug!(?report, "sweep finished");
        if !cancel.is_cancelled() {
            self.stats.record_sweep(report);
        }
        report
    }

    /// Probe one cluster and write the outcome back. Returns `None` when
    /// cancelled before the probe finished.
    async fn probe_and_record(
        &self,
        cluster: TrackedCluster,
        cancel: CancellationToken,
    ) -> Option<(HeartIssue, bool)> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(cluster = %cluster.uuid, "probe cancelled");
                return None;
            }
            outcome = probe_cluster(self.connector.as_ref(), &cluster, self.probe_timeout) => outcome,
        };

        let issue = outcome.issue();
        if issue != cluster.heart_issue {
            info!(
                cluster = %cluster.uuid,
                from = cluster.heart_issue.description(),
                to = issue.description(),
                "heart issue changed"
            );
        }

        let stored = match self
            .store
            .update_cluster(&cluster.uuid, outcome.into_update(Utc::now()))
        {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!(cluster = %cluster.uuid, "cluster removed during sweep");
                true
            }
            Err(e) => {
                error!(cluster = %cluster.uuid, error = %e, "could not record heart issue");
                false
            }
        };
        Some((issue, stored))
    }
}
