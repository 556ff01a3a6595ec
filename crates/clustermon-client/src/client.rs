//! Connector and session contracts.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use clustermon_state::{BucketSummary, ClusterInfo, NodeSummary, TrackedCluster};

use crate::error::{ClientError, ConnectError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to reach a cluster's management API.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Management base URLs, tried in order.
    pub hosts: Vec<String>,
    pub user: String,
    pub password: String,
    /// PEM CA certificate. Without one, server certificates are not verified.
    pub ca_cert: Option<String>,
    /// Deadline for each individual request.
    pub timeout: Duration,
    /// Deadline for bootstrapping against a single host, so one unresponsive
    /// host cannot starve the hosts after it.
    pub host_timeout: Duration,
}

impl ConnectionInfo {
    pub fn new(hosts: Vec<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hosts,
            user: user.into(),
            password: password.into(),
            ca_cert: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            host_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_ca_cert(mut self, ca_cert: Option<String>) -> Self {
        self.ca_cert = ca_cert;
        self
    }

    /// Set the request deadline. The per-host deadline follows it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.host_timeout = timeout;
        self
    }

    pub fn with_host_timeout(mut self, host_timeout: Duration) -> Self {
        self.host_timeout = host_timeout;
        self
    }

    /// Connection details for a tracked cluster (requires a sensitive read).
    pub fn for_cluster(cluster: &TrackedCluster) -> Self {
        Self::new(
            cluster.connection_hosts(),
            cluster.user.clone(),
            cluster.password.clone(),
        )
        .with_ca_cert(cluster.ca_cert.clone())
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("hosts", &self.hosts)
            .field("user", &self.user)
            .field("ca_cert", &self.ca_cert.is_some())
            .field("timeout", &self.timeout)
            .field("host_timeout", &self.host_timeout)
            .finish_non_exhaustive()
    }
}

/// Establishes sessions with clusters.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Bootstrap against the first reachable host.
    ///
    /// When every host fails, an authentication or authorization failure
    /// from any host is reported in preference to connection failures.
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ClusterSession>, ConnectError>;
}

/// An established session. Identity and node facts are captured at
/// bootstrap; buckets and logs are fetched on demand.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    fn cluster_uuid(&self) -> &str;
    fn cluster_name(&self) -> &str;
    fn is_enterprise(&self) -> bool;
    fn cluster_info(&self) -> &ClusterInfo;
    fn nodes_summary(&self) -> &[NodeSummary];

    /// Buckets sorted by name.
    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, ClientError>;

    /// Raw contents of a named server log from the bootstrap node.
    async fn fetch_log(&self, name: &str) -> Result<String, ClientError>;
}
