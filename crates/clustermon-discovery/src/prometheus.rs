//! Discovery source backed by a Prometheus server's scrape targets.
//!
//! Every active target whose labels match the selector names a cluster node
//! through its `instance` label. Unknown nodes are connected to with the
//! configured credentials and tracked; clusters that were discovered earlier
//! and no longer have any node among the targets are dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clustermon_client::{ClusterConnector, ConnectionInfo, DEFAULT_REQUEST_TIMEOUT, parse_connection_string};
use clustermon_state::{ClusterId, HeartIssue, Store, TrackedCluster};

use crate::error::DiscoveryError;
use crate::selector::LabelSelector;
use crate::source::DiscoverySource;

const TARGETS_PATH: &str = "/api/v1/targets?state=active";

#[derive(Debug, Deserialize)]
struct TargetsResponse {
    status: String,
    #[serde(default)]
    data: TargetsData,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
struct Target {
    #[serde(default)]
    labels: HashMap<String, String>,
}

/// Management URL for a target's `instance` label. The exporter port is
/// dropped in favour of the default management port.
fn management_url(instance: &str) -> Option<String> {
    let host = if let Some(rest) = instance.strip_prefix('[') {
        format!("[{}]", rest.split_once(']')?.0)
    } else if instance.matches(':').count() > 1 {
        instance.to_string()
    } else {
        instance.split(':').next()?.to_string()
    };
    parse_connection_string(&host).ok()?.into_iter().next()
}

pub struct PrometheusSource {
    http: reqwest::Client,
    base_url: String,
    selector: LabelSelector,
    store: Arc<dyn Store>,
    connector: Arc<dyn ClusterConnector>,
    user: String,
    password: String,
    timeout: Duration,
    /// Target hosts already resolved to a tracked cluster that does not list
    /// them, so later reconciles skip the connect.
    resolved: Mutex<HashMap<String, ClusterId>>,
}

impl PrometheusSource {
    /// `user` and `password` are the credentials used for every discovered
    /// cluster.
    pub fn new(
        base_url: &str,
        selector: LabelSelector,
        store: Arc<dyn Store>,
        connector: Arc<dyn ClusterConnector>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DiscoveryError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            selector,
            store,
            connector,
            user: user.into(),
            password: password.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            resolved: Mutex::new(HashMap::new()),
        })
    }

    /// Per-cluster connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Management URLs of every selected target.
    async fn fetch_targets(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let url = format!("{}{TARGETS_PATH}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Fetch(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Fetch(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let body: TargetsResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Fetch(format!("{url}: {e}")))?;
        if body.status != "success" {
            return Err(DiscoveryError::Api(
                body.error.unwrap_or_else(|| body.status.clone()),
            ));
        }

        let hosts = body
            .data
            .active_targets
            .iter()
            .filter(|t| self.selector.matches(&t.labels))
            .filter_map(|t| t.labels.get("instance"))
            .filter_map(|instance| management_url(instance))
            .collect();
        Ok(hosts)
    }

    /// Connect to `host` and start tracking the cluster behind it. Returns
    /// the cluster the host belongs to and the hosts now covered, or `None`
    /// if the host could not be resolved.
    async fn track(&self, host: &str) -> Option<(ClusterId, Vec<String>)> {
        let info = ConnectionInfo::new(vec![host.to_string()], &self.user, &self.password)
            .with_timeout(self.timeout);
        let session = match self.connector.connect(&info).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%host, error = %e, "could not connect to discovered cluster");
                return None;
            }
        };

        let uuid = session.cluster_uuid().to_string();
        if self.store.get_cluster(&uuid, false).is_ok() {
            debug!(%host, cluster = %uuid, "discovered host belongs to a tracked cluster");
            return Some((uuid, vec![host.to_string()]));
        }

        let buckets = session.buckets_summary().await.unwrap_or_else(|e| {
            debug!(cluster = %uuid, error = %e, "could not list buckets");
            Vec::new()
        });
        let cluster = TrackedCluster {
            uuid: uuid.clone(),
            name: session.cluster_name().to_string(),
            alias: None,
            user: self.user.clone(),
            password: self.password.clone(),
            ca_cert: None,
            enterprise: session.is_enterprise(),
            hosts: vec![host.to_string()],
            nodes_summary: session.nodes_summary().to_vec(),
            buckets_summary: buckets,
            cluster_info: Some(session.cluster_info().clone()),
            heart_issue: HeartIssue::None,
            last_update: Utc::now(),
            discovered: true,
        };

        match self.store.add_cluster(&cluster) {
            Ok(()) => {
                info!(cluster = %uuid, name = %cluster.name, %host, "discovered cluster");
                Some((uuid, cluster.connection_hosts()))
            }
            Err(e) => {
                warn!(cluster = %uuid, error = %e, "could not track discovered cluster");
                None
            }
        }
    }
}

#[async_trait]
impl DiscoverySource for PrometheusSource {
    async fn reconcile(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError> {
        let targets = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            targets = self.fetch_targets() => targets?,
        };
        debug!(targets = targets.len(), selector = %self.selector, "fetched discovery targets");

        let tracked = self.store.get_clusters(true, false)?;
        let tracked_ids: HashSet<&str> = tracked.iter().map(|c| c.uuid.as_str()).collect();

        let mut resolved = self.resolved.lock().map(|r| r.clone()).unwrap_or_default();
        resolved.retain(|host, uuid| targets.contains(host) && tracked_ids.contains(uuid.as_str()));

        let mut known: HashSet<String> = tracked
            .iter()
            .flat_map(TrackedCluster::connection_hosts)
            .chain(resolved.keys().cloned())
            .collect();

        let mut cancelled = false;
        for host in &targets {
            if known.contains(host) {
                continue;
            }
            let covered = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                covered = self.track(host) => covered,
            };
            if let Some((uuid, hosts)) = covered {
                resolved.insert(host.clone(), uuid);
                known.extend(hosts);
            }
        }

        if let Ok(mut cache) = self.resolved.lock() {
            *cache = resolved.clone();
        }
        if cancelled {
            return Err(DiscoveryError::Cancelled);
        }

        for cluster in tracked.iter().filter(|c| c.discovered) {
            let listed = cluster.connection_hosts().iter().any(|h| targets.contains(h))
                || resolved.values().any(|uuid| *uuid == cluster.uuid);
            if listed {
                continue;
            }
            match self.store.delete_cluster(&cluster.uuid) {
                Ok(()) => info!(cluster = %cluster.uuid, "discovered cluster no longer listed, removed"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(cluster = %cluster.uuid, error = %e, "could not remove cluster"),
            }
        }

        Ok(())
    }
}
