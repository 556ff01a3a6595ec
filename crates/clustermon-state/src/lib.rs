//! clustermon-state: persistent registry of tracked clusters.
//!
//! Backed by [redb](https://docs.rs/redb), holds the tracked clusters, their
//! aliases, the manager's users and stored cloud credentials.
//!
//! # Architecture
//!
//! Every record is JSON-serialized into a redb `&str -> &[u8]` table. The
//! [`Store`] trait is the contract the monitors and the REST layer depend on;
//! [`StateStore`] is the redb implementation, available on disk or fully in
//! memory for tests.
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).
//! redb serializes write transactions, so concurrent per-cluster updates from
//! probe workers never interleave inside a single record.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{resolve_cluster_id, StateStore, Store};
pub use types::*;
