//! Counters the monitors publish for the metrics endpoint.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tally of one heart sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub healthy: usize,
    pub bad_auth: usize,
    pub no_connection: usize,
    pub uuid_mismatch: usize,
    /// Probes whose outcome could not be written back.
    pub store_errors: usize,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sweeps: u64,
    pub last_sweep: Option<SweepReport>,
    pub reconciles: u64,
    pub reconcile_failures: u64,
}

/// Shared between the heart monitor, the discovery manager and the API.
#[derive(Debug, Default)]
pub struct MonitorStats {
    sweeps: AtomicU64,
    last_sweep: Mutex<Option<SweepReport>>,
    reconciles: AtomicU64,
    reconcile_failures: AtomicU64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed sweep.
    pub fn record_sweep(&self, report: SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_sweep.lock() {
            *last = Some(report);
        }
    }

    /// Record a finished reconcile. Cancelled runs are not recorded.
    pub fn record_reconcile(&self, succeeded: bool) {
        if succeeded {
            self.reconciles.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            last_sweep: self.last_sweep.lock().ok().and_then(|last| *last),
            reconciles: self.reconciles.load(Ordering::Relaxed),
            reconcile_failures: self.reconcile_failures.load(Ordering::Relaxed),
        }
    }
}
