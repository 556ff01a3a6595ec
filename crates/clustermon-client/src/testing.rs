//! Scripted connectors for tests.
//!
//! [`StaticConnector`] answers each host with a fixed outcome;
//! [`BlockingConnector`] parks every connect until released and records how
//! many were parked at once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use clustermon_state::{BucketSummary, ClusterInfo, NodeSummary};

use crate::client::{ClusterConnector, ClusterSession, ConnectionInfo};
use crate::error::{ClientError, ConnectError};

/// Facts a fake cluster reports once connected.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    pub uuid: String,
    pub name: String,
    pub enterprise: bool,
    pub info: ClusterInfo,
    pub nodes: Vec<NodeSummary>,
    pub buckets: Vec<BucketSummary>,
    pub logs: HashMap<String, String>,
}

impl FakeCluster {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            enterprise: true,
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: NodeSummary) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_bucket(mut self, bucket: BucketSummary) -> Self {
        self.buckets.push(bucket);
        self
    }

    pub fn with_log(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.logs.insert(name.into(), body.into());
        self
    }
}

#[derive(Debug)]
pub struct FakeSession(FakeCluster);

#[async_trait]
impl ClusterSession for FakeSession {
    fn cluster_uuid(&self) -> &str {
        &self.0.uuid
    }

    fn cluster_name(&self) -> &str {
        &self.0.name
    }

    fn is_enterprise(&self) -> bool {
        self.0.enterprise
    }

    fn cluster_info(&self) -> &ClusterInfo {
        &self.0.info
    }

    fn nodes_summary(&self) -> &[NodeSummary] {
        &self.0.nodes
    }

    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, ClientError> {
        let mut buckets = self.0.buckets.clone();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn fetch_log(&self, name: &str) -> Result<String, ClientError> {
        self.0
            .logs
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("log {name}")))
    }
}

/// What a scripted host answers.
#[derive(Debug, Clone)]
pub enum Outcome {
    Connect(FakeCluster),
    Fail(ConnectError),
}

/// Answers each host with a scripted outcome; unscripted hosts refuse the
/// connection.
#[derive(Debug, Default)]
pub struct StaticConnector {
    hosts: Mutex<HashMap<String, Outcome>>,
    calls: AtomicUsize,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: impl Into<String>, outcome: Outcome) -> Self {
        self.set_host(host, outcome);
        self
    }

    /// Replace the outcome for `host`, e.g. to simulate a rebuilt cluster.
    pub fn set_host(&self, host: impl Into<String>, outcome: Outcome) {
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.insert(host.into(), outcome);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self, host: &str) -> Outcome {
        self.hosts
            .lock()
            .ok()
            .and_then(|hosts| hosts.get(host).cloned())
            .unwrap_or_else(|| Outcome::Fail(ConnectError::Connection(format!("{host}: refused"))))
    }
}

#[async_trait]
impl ClusterConnector for StaticConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ClusterSession>, ConnectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut auth_error = None;
        let mut last_error = None;
        for host in &info.hosts {
            match self.outcome(host) {
                Outcome::Connect(cluster) => return Ok(Box::new(FakeSession(cluster))),
                Outcome::Fail(e) if e.is_auth() => {
                    auth_error.get_or_insert(e);
                }
                Outcome::Fail(e) => last_error = Some(e),
            }
        }
        Err(auth_error
            .or(last_error)
            .unwrap_or_else(|| ConnectError::InvalidConnectionString("no hosts".to_string())))
    }
}

/// Parks every connect until [`release`](Self::release) is called, then
/// connects to a cluster whose identifier is the first host.
#[derive(Debug)]
pub struct BlockingConnector {
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl Default for BlockingConnector {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BlockingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unblock every parked and future connect.
    pub fn release(&self) {
        self.gate.close();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for BlockingConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ClusterSession>, ConnectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // A closed gate means released.
        let _ = self.gate.acquire().await;

        let uuid = info.hosts.first().cloned().unwrap_or_default();
        Ok(Box::new(FakeSession(FakeCluster::new(uuid.clone(), uuid))))
    }
}
