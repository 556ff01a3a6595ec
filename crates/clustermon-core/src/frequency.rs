use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);
pub const DEFAULT_STATUS: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_DISCOVERY: Duration = Duration::from_secs(60);

/// Intervals for the periodic components, fixed at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyConfiguration {
    pub heartbeat: Duration,
    /// Reserved; nothing is scheduled on it yet.
    pub status: Duration,
    pub discovery: Duration,
}

impl Default for FrequencyConfiguration {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            status: DEFAULT_STATUS,
            discovery: DEFAULT_DISCOVERY,
        }
    }
}

impl FrequencyConfiguration {
    /// The first zero interval, by name, if any.
    pub fn zero_interval(&self) -> Option<&'static str> {
        [
            ("heartbeat", self.heartbeat),
            ("status", self.status),
            ("discovery", self.discovery),
        ]
        .into_iter()
        .find(|(_, d)| d.is_zero())
        .map(|(name, _)| name)
    }
}

/// Default heart monitor pool size: three quarters of the available CPUs,
/// never less than one.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 3 / 4).max(1)
}
