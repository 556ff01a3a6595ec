//! JSON shapes of the management API responses we consume.

use serde::Deserialize;

use clustermon_state::{BucketSummary, ClusterInfo, NodeSummary};

use crate::connstr::node_base_url;

/// `GET /pools`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Pools {
    /// An empty list rather than a string on uninitialised clusters.
    #[serde(default)]
    pub uuid: serde_json::Value,
    #[serde(default)]
    pub is_enterprise: bool,
}

impl Pools {
    pub fn cluster_uuid(&self) -> Option<&str> {
        self.uuid.as_str().filter(|u| !u.is_empty())
    }
}

/// `GET /pools/default`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PoolsDefault {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub storage_totals: StorageTotals,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StorageTotals {
    #[serde(default)]
    pub ram: RamTotals,
    #[serde(default)]
    pub hdd: HddTotals,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RamTotals {
    #[serde(default)]
    pub quota_total: u64,
    #[serde(default)]
    pub quota_used: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HddTotals {
    #[serde(default)]
    pub quota_total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub used_by_data: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Node {
    #[serde(rename = "nodeUUID", default)]
    pub node_uuid: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cluster_membership: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub system_stats: SystemStats,
    #[serde(default)]
    pub cpu_count: serde_json::Value,
    #[serde(default)]
    pub uptime: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SystemStats {
    #[serde(default)]
    pub cpu_utilization_rate: f64,
    #[serde(default)]
    pub swap_total: u64,
    #[serde(default)]
    pub swap_used: u64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub mem_free: u64,
}

impl PoolsDefault {
    pub fn cluster_info(&self) -> ClusterInfo {
        let totals = &self.storage_totals;
        ClusterInfo {
            ram_quota: totals.ram.quota_total,
            ram_used: totals.ram.quota_used,
            disk_total: totals.hdd.quota_total,
            disk_used: totals.hdd.used,
            disk_used_by_data: totals.hdd.used_by_data,
        }
    }

    pub fn nodes_summary(&self, tls: bool) -> Vec<NodeSummary> {
        self.nodes.iter().map(|n| n.summary(tls)).collect()
    }
}

impl Node {
    fn summary(&self, tls: bool) -> NodeSummary {
        // Older servers report the CPU count as a string.
        let cpu_count = match &self.cpu_count {
            serde_json::Value::Number(n) => n.as_u64().unwrap_or_default() as u32,
            serde_json::Value::String(s) => s.parse().unwrap_or_default(),
            _ => 0,
        };
        NodeSummary {
            node_uuid: self.node_uuid.clone(),
            version: self.version.clone(),
            host: node_base_url(&self.hostname, tls).unwrap_or_default(),
            os: self.os.clone(),
            status: self.status.clone(),
            cluster_membership: self.cluster_membership.clone(),
            services: self.services.clone(),
            swap_used: self.system_stats.swap_used,
            swap_total: self.system_stats.swap_total,
            cpu_utilization_rate: self.system_stats.cpu_utilization_rate,
            mem_total: self.system_stats.mem_total,
            mem_free: self.system_stats.mem_free,
            cpu_count,
            uptime: self.uptime.clone(),
        }
    }
}

/// One entry of `GET /pools/default/buckets`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Bucket {
    pub name: String,
    #[serde(default)]
    pub bucket_type: String,
    #[serde(default)]
    pub storage_backend: String,
    #[serde(default)]
    pub eviction_policy: String,
    #[serde(default)]
    pub conflict_resolution_type: String,
    #[serde(default)]
    pub compression_mode: String,
    #[serde(default)]
    pub replica_number: u64,
    #[serde(default)]
    pub controllers: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub quota: BucketQuota,
    #[serde(default)]
    pub basic_stats: BucketStats,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BucketQuota {
    #[serde(default)]
    pub ram: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BucketStats {
    #[serde(default)]
    pub quota_percent_used: f64,
    #[serde(default)]
    pub item_count: u64,
}

impl Bucket {
    fn summary(self) -> BucketSummary {
        let bucket_type = match self.bucket_type.as_str() {
            "membase" => "couchbase".to_string(),
            _ => self.bucket_type,
        };
        BucketSummary {
            flush_enabled: self.controllers.contains_key("flush"),
            name: self.name,
            compression_mode: self.compression_mode,
            conflict_resolution_type: self.conflict_resolution_type,
            bucket_type,
            storage_backend: self.storage_backend,
            eviction_policy: self.eviction_policy,
            quota: self.quota.ram,
            quota_used: self.basic_stats.quota_percent_used,
            num_replicas: self.replica_number,
            items: self.basic_stats.item_count,
        }
    }
}

/// Bucket summaries sorted by name.
pub(crate) fn buckets_summary(buckets: Vec<Bucket>) -> Vec<BucketSummary> {
    let mut summaries: Vec<BucketSummary> = buckets.into_iter().map(Bucket::summary).collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uninitialised_cluster_has_no_uuid() {
        let pools: Pools = serde_json::from_value(json!({"uuid": [], "isEnterprise": true})).unwrap();
        assert_eq!(pools.cluster_uuid(), None);

        let pools: Pools = serde_json::from_value(json!({"uuid": "abc", "isEnterprise": false})).unwrap();
        assert_eq!(pools.cluster_uuid(), Some("abc"));
        assert!(!pools.is_enterprise);
    }

    #[test]
    fn pools_default_maps_to_summaries() {
        let pools: PoolsDefault = serde_json::from_value(json!({
            "clusterName": "prod",
            "storageTotals": {
                "ram": {"quotaTotal": 100, "quotaUsed": 40},
                "hdd": {"quotaTotal": 1000, "used": 300, "usedByData": 200}
            },
            "nodes": [{
                "nodeUUID": "n1",
                "hostname": "10.0.0.1:8091",
                "version": "7.1.0-2556-enterprise",
                "os": "x86_64-unknown-linux-gnu",
                "status": "healthy",
                "clusterMembership": "active",
                "services": ["kv", "n1ql"],
                "systemStats": {"cpu_utilization_rate": 12.5, "swap_total": 10, "swap_used": 1,
                                 "mem_total": 64, "mem_free": 32},
                "cpuCount": "8",
                "uptime": "3600"
            }]
        }))
        .unwrap();

        assert_eq!(pools.cluster_name, "prod");
        let info = pools.cluster_info();
        assert_eq!(info.ram_quota, 100);
        assert_eq!(info.disk_used_by_data, 200);

        let nodes = pools.nodes_summary(true);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].host, "https://10.0.0.1:18091");
        assert_eq!(nodes[0].cpu_count, 8);
        assert!(nodes[0].has_service("n1ql"));
        assert_eq!(nodes[0].cpu_utilization_rate, 12.5);
    }

    #[test]
    fn buckets_are_sorted_and_membase_renamed() {
        let buckets: Vec<Bucket> = serde_json::from_value(json!([
            {"name": "travel", "bucketType": "membase", "replicaNumber": 1,
             "controllers": {"flush": "/pools/default/buckets/travel/controller/doFlush"},
             "quota": {"ram": 1024}, "basicStats": {"quotaPercentUsed": 5.5, "itemCount": 31591}},
            {"name": "beer", "bucketType": "ephemeral"}
        ]))
        .unwrap();

        let summaries = buckets_summary(buckets);
        assert_eq!(summaries[0].name, "beer");
        assert!(!summaries[0].flush_enabled);
        assert_eq!(summaries[1].bucket_type, "couchbase");
        assert!(summaries[1].flush_enabled);
        assert_eq!(summaries[1].items, 31591);
        assert_eq!(summaries[1].quota, 1024);
    }
}
