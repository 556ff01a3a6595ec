//! clustermon-discovery: keeps the tracked-cluster set in sync with an
//! external catalog.
//!
//! [`DiscoveryManager`] only schedules: it calls
//! [`DiscoverySource::reconcile`] immediately on start and then once per
//! interval, logging errors. The source does all reads and writes itself.
//! [`PrometheusSource`] is the production source, driven by a Prometheus
//! server's active scrape targets filtered by a [`LabelSelector`].

pub mod error;
pub mod manager;
pub mod prometheus;
pub mod selector;
pub mod source;

pub use error::{DiscoveryError, SelectorError};
pub use manager::DiscoveryManager;
pub use prometheus::PrometheusSource;
pub use selector::LabelSelector;
pub use source::DiscoverySource;
