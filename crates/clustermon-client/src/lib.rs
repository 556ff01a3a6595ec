//! Client for the management REST API of a monitored cluster.
//!
//! The monitor only talks to clusters through [`ClusterConnector`] and
//! [`ClusterSession`], so the heart monitor and discovery sources can be
//! exercised against scripted connectors (feature `test-util`).

pub mod client;
pub mod connstr;
pub mod error;
pub mod rest;
mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClusterConnector, ClusterSession, ConnectionInfo, DEFAULT_REQUEST_TIMEOUT};
pub use connstr::parse_connection_string;
pub use error::{ClientError, ConnectError};
pub use rest::RestConnector;
