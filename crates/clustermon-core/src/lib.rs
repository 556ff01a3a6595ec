//! Shared building blocks for the cluster monitor.
//!
//! - [`keys`]: process-scoped key material derived from the operator secret
//! - [`token`]: signed, expiring session tokens
//! - [`password`]: salted password hashes for manager users
//! - [`frequency`]: the intervals that drive the periodic components
//! - [`stats`]: counters the monitors publish for scraping

pub mod error;
pub mod frequency;
pub mod keys;
pub mod password;
pub mod stats;
pub mod token;

pub use error::{KeyError, TokenError};
pub use frequency::FrequencyConfiguration;
pub use keys::KeyMaterial;
pub use stats::{MonitorStats, StatsSnapshot, SweepReport};
