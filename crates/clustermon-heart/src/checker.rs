//! Probe logic and failure classification.
//!
//! A probe connects with the stored credentials, confirms the cluster is
//! still the one being tracked and collects fresh summaries. Failures are
//! folded into a [`HeartIssue`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use clustermon_client::{ClusterConnector, ConnectError, ConnectionInfo};
use clustermon_state::{BucketSummary, ClusterInfo, ClusterUpdate, HeartIssue, NodeSummary, TrackedCluster};

/// Facts collected from a healthy cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    pub name: String,
    pub enterprise: bool,
    pub info: ClusterInfo,
    pub nodes: Vec<NodeSummary>,
    /// `None` when the bucket listing failed; stored buckets are kept.
    pub buckets: Option<Vec<BucketSummary>>,
}

/// Result of probing one cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy(Box<ClusterSnapshot>),
    Failed(HeartIssue),
}

impl ProbeOutcome {
    pub fn issue(&self) -> HeartIssue {
        match self {
            ProbeOutcome::Healthy(_) => HeartIssue::None,
            ProbeOutcome::Failed(issue) => *issue,
        }
    }

    /// The store update recording this outcome.
    ///
    /// Failures only touch the classification, so the last good summaries
    /// survive (and are never overwritten with another cluster's data).
    pub fn into_update(self, now: DateTime<Utc>) -> ClusterUpdate {
        match self {
            ProbeOutcome::Failed(issue) => ClusterUpdate::heart_issue(issue),
            ProbeOutcome::Healthy(snapshot) => {
                let snapshot = *snapshot;
                ClusterUpdate {
                    name: Some(snapshot.name),
                    enterprise: Some(snapshot.enterprise),
                    cluster_info: Some(snapshot.info),
                    nodes_summary: Some(snapshot.nodes),
                    buckets_summary: snapshot.buckets,
                    heart_issue: Some(HeartIssue::None),
                    last_update: Some(now),
                    ..Default::default()
                }
            }
        }
    }
}

/// Map a connection failure onto the heart issue it represents.
pub fn classify(error: &ConnectError) -> HeartIssue {
    if error.is_auth() {
        HeartIssue::BadAuth
    } else {
        HeartIssue::NoConnection
    }
}

/// Lower bound on the time a single host gets to answer a bootstrap.
pub const MIN_HOST_BUDGET: Duration = Duration::from_millis(500);

/// Share of the probe deadline each host gets when several are tried.
pub fn host_budget(timeout: Duration, hosts: usize) -> Duration {
    let share = timeout / u32::try_from(hosts.max(1)).unwrap_or(u32::MAX);
    share.max(MIN_HOST_BUDGET).min(timeout)
}

/// Probe `cluster` once. The whole probe is bounded by `timeout`, which also
/// caps each individual request. Host attempts split the deadline between
/// them, so a host that accepts but never answers does not hide the others.
pub async fn probe_cluster(
    connector: &dyn ClusterConnector,
    cluster: &TrackedCluster,
    timeout: Duration,
) -> ProbeOutcome {
    let info = ConnectionInfo::for_cluster(cluster).with_timeout(timeout);
    let budget = host_budget(timeout, info.hosts.len());
    let info = info.with_host_timeout(budget);

    let probe = async {
        let session = connector.connect(&info).await.map_err(|e| {
            debug!(cluster = %cluster.uuid, error = %e, "connect failed");
            classify(&e)
        })?;

        if session.cluster_uuid() != cluster.uuid {
            warn!(
                cluster = %cluster.uuid,
                found = %session.cluster_uuid(),
                "cluster identifier changed"
            );
            return Err(HeartIssue::UuidMismatch);
        }

        let buckets = match session.buckets_summary().await {
            Ok(buckets) => Some(buckets),
            Err(e) => {
                warn!(cluster = %cluster.uuid, error = %e, "could not list buckets");
                None
            }
        };

        Ok::<_, HeartIssue>(ClusterSnapshot {
            name: session.cluster_name().to_string(),
            enterprise: session.is_enterprise(),
            info: session.cluster_info().clone(),
            nodes: session.nodes_summary().to_vec(),
            buckets,
        })
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(snapshot)) => ProbeOutcome::Healthy(Box::new(snapshot)),
        Ok(Err(issue)) => ProbeOutcome::Failed(issue),
        Err(_) => {
            debug!(cluster = %cluster.uuid, ?timeout, "probe timed out");
            ProbeOutcome::Failed(HeartIssue::NoConnection)
        }
    }
}
