//! clustermon-heart: periodic health probing of tracked clusters.
//!
//! # Architecture
//!
//! ```text
//! HeartMonitor
//!   └── Sweep driver (one task, ticks on the heartbeat interval)
//!       └── Sweep (at most one in flight; overlapping ticks are skipped)
//!           ├── Semaphore(max_workers) bounds concurrent probes
//!           ├── probe_cluster() → ProbeOutcome
//!           └── Store::update_cluster() with the classification
//! ```
//!
//! Every probe is bounded by its own timeout and by the monitor's
//! cancellation token, so `stop()` returns once in-flight probes have
//! observed cancellation.

pub mod checker;
pub mod monitor;

pub use checker::{ProbeOutcome, classify, probe_cluster};
pub use clustermon_core::SweepReport;
pub use monitor::HeartMonitor;
