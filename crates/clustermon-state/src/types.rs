//! Domain types for the cluster state store.
//!
//! These types represent the tracked clusters and their last-known health
//! snapshot, cluster aliases, manager users and cloud credentials. All types
//! are serializable to/from JSON for storage in redb tables and for the REST
//! layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StateError, StateResult};

/// Cluster identifier as reported by the cluster itself.
pub type ClusterId = String;

/// Every alias must start with this prefix, which keeps the alias namespace
/// disjoint from cluster UUIDs.
pub const ALIAS_PREFIX: &str = "grp_";

/// Maximum alias length in bytes, prefix included.
pub const MAX_ALIAS_LENGTH: usize = 100;

// ── Heart issue ──────────────────────────────────────────────────

/// Outcome of the most recent heartbeat for a cluster.
///
/// Serialized as its numeric code (0–3) so API consumers can switch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeartIssue {
    #[default]
    None,
    BadAuth,
    NoConnection,
    UuidMismatch,
}

impl HeartIssue {
    pub fn code(self) -> u8 {
        match self {
            HeartIssue::None => 0,
            HeartIssue::BadAuth => 1,
            HeartIssue::NoConnection => 2,
            HeartIssue::UuidMismatch => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(HeartIssue::None),
            1 => Some(HeartIssue::BadAuth),
            2 => Some(HeartIssue::NoConnection),
            3 => Some(HeartIssue::UuidMismatch),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == HeartIssue::None
    }

    /// Human-readable explanation shown next to a failing cluster.
    pub fn description(self) -> &'static str {
        match self {
            HeartIssue::None => "none",
            HeartIssue::BadAuth => {
                "the stored credentials are no longer valid or lack the required permissions"
            }
            HeartIssue::NoConnection => "could not connect to the cluster during the last heartbeat",
            HeartIssue::UuidMismatch => "the stored hosts now point at a different cluster",
        }
    }
}

impl Serialize for HeartIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for HeartIssue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        HeartIssue::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown heart issue code {code}")))
    }
}

// ── Summaries ────────────────────────────────────────────────────

/// Storage and memory totals for a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterInfo {
    pub ram_quota: u64,
    pub ram_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_used_by_data: u64,
}

/// Point-in-time facts about one node of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub node_uuid: String,
    #[serde(default)]
    pub version: String,
    /// Management base URL of the node (`scheme://host:port`).
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cluster_membership: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub swap_used: u64,
    #[serde(default)]
    pub swap_total: u64,
    #[serde(default)]
    pub cpu_utilization_rate: f64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub mem_free: u64,
    #[serde(default)]
    pub cpu_count: u32,
    #[serde(default)]
    pub uptime: String,
}

impl NodeSummary {
    pub fn has_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }
}

/// Point-in-time facts about one bucket of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BucketSummary {
    pub name: String,
    #[serde(default)]
    pub compression_mode: String,
    #[serde(default)]
    pub conflict_resolution_type: String,
    #[serde(default)]
    pub bucket_type: String,
    #[serde(default)]
    pub storage_backend: String,
    #[serde(default)]
    pub eviction_policy: String,
    #[serde(default)]
    pub quota: u64,
    #[serde(default)]
    pub quota_used: f64,
    #[serde(default)]
    pub flush_enabled: bool,
    #[serde(default)]
    pub num_replicas: u64,
    #[serde(default)]
    pub items: u64,
}

// ── Tracked cluster ──────────────────────────────────────────────

/// A registered remote cluster under health and discovery monitoring.
///
/// Credentials are only populated on sensitive reads and are skipped when
/// serializing blank values, so non-sensitive reads never leak them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedCluster {
    pub uuid: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// PEM-encoded CA certificate used to verify the cluster's TLS endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    pub enterprise: bool,
    /// Seed addresses given when the cluster was added.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub nodes_summary: Vec<NodeSummary>,
    #[serde(default)]
    pub buckets_summary: Vec<BucketSummary>,
    #[serde(default)]
    pub cluster_info: Option<ClusterInfo>,
    #[serde(rename = "heart_beat_issue", default, skip_serializing_if = "HeartIssue::is_none")]
    pub heart_issue: HeartIssue,
    /// When the summaries were last refreshed from the cluster.
    pub last_update: DateTime<Utc>,
    /// Whether the cluster was added by a discovery source.
    #[serde(default)]
    pub discovered: bool,
}

impl TrackedCluster {
    /// Hosts to try when connecting: last-known node hosts first, then the
    /// seed hosts, without duplicates.
    pub fn connection_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        let node_hosts = self.nodes_summary.iter().map(|n| &n.host);
        for host in node_hosts.chain(self.hosts.iter()) {
            if !host.is_empty() && !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        hosts
    }

    /// Blank out credentials for non-sensitive reads.
    pub fn redact(&mut self) {
        self.user.clear();
        self.password.clear();
        self.ca_cert = None;
    }
}

/// Partial update for a tracked cluster.
///
/// Every `Some` field overwrites the stored value independently of the
/// others; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterUpdate {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ca_cert: Option<String>,
    pub enterprise: Option<bool>,
    pub hosts: Option<Vec<String>>,
    pub nodes_summary: Option<Vec<NodeSummary>>,
    pub buckets_summary: Option<Vec<BucketSummary>>,
    pub cluster_info: Option<ClusterInfo>,
    pub heart_issue: Option<HeartIssue>,
    pub last_update: Option<DateTime<Utc>>,
}

impl ClusterUpdate {
    /// An update that only records a heartbeat classification.
    pub fn heart_issue(issue: HeartIssue) -> Self {
        Self {
            heart_issue: Some(issue),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every provided field to `cluster`. The alias field is handled by
    /// the store because it also touches the alias table.
    pub fn apply(self, cluster: &mut TrackedCluster) {
        if let Some(name) = self.name {
            cluster.name = name;
        }
        if let Some(user) = self.user {
            cluster.user = user;
        }
        if let Some(password) = self.password {
            cluster.password = password;
        }
        if let Some(ca_cert) = self.ca_cert {
            cluster.ca_cert = Some(ca_cert);
        }
        if let Some(enterprise) = self.enterprise {
            cluster.enterprise = enterprise;
        }
        if let Some(hosts) = self.hosts {
            cluster.hosts = hosts;
        }
        if let Some(nodes) = self.nodes_summary {
            cluster.nodes_summary = nodes;
        }
        if let Some(buckets) = self.buckets_summary {
            cluster.buckets_summary = buckets;
        }
        if let Some(info) = self.cluster_info {
            cluster.cluster_info = Some(info);
        }
        if let Some(issue) = self.heart_issue {
            cluster.heart_issue = issue;
        }
        if let Some(at) = self.last_update {
            cluster.last_update = at;
        }
    }
}

// ── Alias ────────────────────────────────────────────────────────

/// Human-chosen name resolving to exactly one tracked cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterAlias {
    pub alias: String,
    pub cluster_uuid: ClusterId,
}

impl ClusterAlias {
    pub fn new(alias: impl Into<String>, cluster_uuid: impl Into<String>) -> StateResult<Self> {
        let alias = alias.into();
        validate_alias(&alias)?;
        Ok(Self {
            alias,
            cluster_uuid: cluster_uuid.into(),
        })
    }
}

/// Whether `name` lives in the alias namespace (as opposed to being a UUID).
pub fn is_alias(name: &str) -> bool {
    name.starts_with(ALIAS_PREFIX)
}

/// Check prefix and length constraints on an alias name.
pub fn validate_alias(alias: &str) -> StateResult<()> {
    if !is_alias(alias) || alias.len() == ALIAS_PREFIX.len() {
        return Err(StateError::InvalidAlias(format!(
            "aliases must start with '{ALIAS_PREFIX}' followed by a name"
        )));
    }
    if alias.len() > MAX_ALIAS_LENGTH {
        return Err(StateError::InvalidAlias(format!(
            "maximum alias length is {MAX_ALIAS_LENGTH} characters"
        )));
    }
    Ok(())
}

// ── Users & credentials ──────────────────────────────────────────

/// A user of the manager's own REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user: String,
    /// Encoded password hash, never the plain text.
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

/// Credentials for an external cloud control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudCredential {
    pub name: String,
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_issue_serializes_as_code() {
        let json = serde_json::to_string(&HeartIssue::UuidMismatch).unwrap();
        assert_eq!(json, "3");
        let back: HeartIssue = serde_json::from_str("1").unwrap();
        assert_eq!(back, HeartIssue::BadAuth);
        assert!(serde_json::from_str::<HeartIssue>("9").is_err());
    }

    #[test]
    fn alias_validation() {
        assert!(validate_alias("grp_prod").is_ok());
        assert!(validate_alias("prod").is_err());
        assert!(validate_alias("grp_").is_err());
        let long = format!("{ALIAS_PREFIX}{}", "x".repeat(MAX_ALIAS_LENGTH));
        assert!(validate_alias(&long).is_err());
    }

    #[test]
    fn connection_hosts_prefers_nodes_and_dedups() {
        let cluster = TrackedCluster {
            uuid: "abc".to_string(),
            name: "c".to_string(),
            alias: None,
            user: String::new(),
            password: String::new(),
            ca_cert: None,
            enterprise: true,
            hosts: vec!["http://seed:8091".to_string(), "http://n1:8091".to_string()],
            nodes_summary: vec![NodeSummary {
                node_uuid: "n1".to_string(),
                host: "http://n1:8091".to_string(),
                ..Default::default()
            }],
            buckets_summary: Vec::new(),
            cluster_info: None,
            heart_issue: HeartIssue::None,
            last_update: Utc::now(),
            discovered: false,
        };

        assert_eq!(
            cluster.connection_hosts(),
            vec!["http://n1:8091".to_string(), "http://seed:8091".to_string()]
        );
    }

    #[test]
    fn redacted_cluster_omits_credentials_in_json() {
        let mut cluster = TrackedCluster {
            uuid: "abc".to_string(),
            name: "c".to_string(),
            alias: None,
            user: "admin".to_string(),
            password: "secret".to_string(),
            ca_cert: Some("PEM".to_string()),
            enterprise: false,
            hosts: Vec::new(),
            nodes_summary: Vec::new(),
            buckets_summary: Vec::new(),
            cluster_info: None,
            heart_issue: HeartIssue::NoConnection,
            last_update: Utc::now(),
            discovered: false,
        };
        cluster.redact();

        let json = serde_json::to_value(&cluster).unwrap();
        assert!(json.get("user").is_none());
        assert!(json.get("password").is_none());
        assert!(json.get("ca_cert").is_none());
        assert_eq!(json["heart_beat_issue"], 2);
    }
}
