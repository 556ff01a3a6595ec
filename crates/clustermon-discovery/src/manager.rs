//! Discovery manager: drives a [`DiscoverySource`] on a fixed interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clustermon_core::MonitorStats;

use crate::error::DiscoveryError;
use crate::source::DiscoverySource;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct DiscoveryManager {
    source: Arc<dyn DiscoverySource>,
    stats: Arc<MonitorStats>,
    running: Mutex<Option<Running>>,
}

impl DiscoveryManager {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            source,
            stats: Arc::new(MonitorStats::new()),
            running: Mutex::new(None),
        }
    }

    /// Count reconcile outcomes in `stats`.
    pub fn with_stats(mut self, stats: Arc<MonitorStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Reconcile now and then every `interval`. Returns `false` if already
    /// running.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut running) = self.running.lock() else {
            error!("discovery manager state poisoned");
            return false;
        };
        if running.is_some() {
            debug!("discovery manager already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(discover_loop(
            self.source.clone(),
            self.stats.clone(),
            interval,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });

        info!(?interval, "discovery started");
        true
    }

    /// Cancel the loop, including any in-flight reconcile, and wait for it.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => {
                error!("discovery manager state poisoned");
                return;
            }
        };
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "discovery task ended abnormally");
        }
        info!("discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }
}

async fn discover_loop(
    source: Arc<dyn DiscoverySource>,
    stats: Arc<MonitorStats>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        debug!("performing discovery");
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("discovery cancelled mid-run");
                return;
            }
            result = source.reconcile(&cancel) => match result {
                Ok(()) => {
                    stats.record_reconcile(true);
                    debug!(next_in = ?interval, "discovery complete");
                }
                Err(DiscoveryError::Cancelled) => debug!("discovery cancelled mid-run"),
                Err(e) => {
                    stats.record_reconcile(false);
                    error!(error = %e, "discovery failed");
                }
            },
        }
    }
}
