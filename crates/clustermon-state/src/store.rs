//! Store contract and its redb-backed implementation.
//!
//! `Store` is what the heart monitor, the discovery sources and the REST
//! layer depend on. `StateStore` implements it over redb; every record is
//! JSON-serialized into a `&str -> &[u8]` table. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable registry of tracked clusters, aliases, users and credentials.
///
/// All operations are synchronous and may be called concurrently from
/// multiple probe workers.
pub trait Store: Send + Sync {
    /// True once at least one user has been provisioned.
    fn is_initialized(&self) -> StateResult<bool>;

    fn add_user(&self, user: &User) -> StateResult<()>;
    fn get_user(&self, name: &str) -> StateResult<User>;

    /// List tracked clusters. Non-sensitive reads blank the credentials.
    fn get_clusters(&self, sensitive: bool, enterprise_only: bool)
    -> StateResult<Vec<TrackedCluster>>;
    fn get_cluster(&self, uuid: &str, sensitive: bool) -> StateResult<TrackedCluster>;
    fn add_cluster(&self, cluster: &TrackedCluster) -> StateResult<()>;
    fn update_cluster(&self, uuid: &str, update: ClusterUpdate) -> StateResult<()>;
    fn delete_cluster(&self, uuid: &str) -> StateResult<()>;

    fn add_alias(&self, alias: &ClusterAlias) -> StateResult<()>;
    fn delete_alias(&self, alias: &str) -> StateResult<()>;
    fn get_alias(&self, alias: &str) -> StateResult<ClusterAlias>;

    fn add_cloud_credentials(&self, creds: &CloudCredential) -> StateResult<()>;
    fn get_cloud_credentials(&self, sensitive: bool) -> StateResult<Vec<CloudCredential>>;
}

/// Resolve a path segment that is either a cluster UUID or an alias.
pub fn resolve_cluster_id(store: &dyn Store, id_or_alias: &str) -> StateResult<ClusterId> {
    if !is_alias(id_or_alias) {
        return Ok(id_or_alias.to_string());
    }
    Ok(store.get_alias(id_or_alias)?.cluster_uuid)
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn get_record<T, Tbl>(table: &Tbl, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn list_records<T, Tbl>(table: &Tbl) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(ALIASES).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(CLOUD_CREDENTIALS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or overwrite a single record.
    fn put<T: Serialize>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl Store for StateStore {
    fn is_initialized(&self) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        let mut iter = table.iter().map_err(map_err!(Read))?;
        Ok(iter.next().is_some())
    }

    // ── Users ──────────────────────────────────────────────────────

    fn add_user(&self, user: &User) -> StateResult<()> {
        self.put(USERS, &user.user, user)?;
        debug!(user = %user.user, "user stored");
        Ok(())
    }

    fn get_user(&self, name: &str) -> StateResult<User> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        get_record(&table, name)?.ok_or_else(|| StateError::NotFound(format!("user {name}")))
    }

    // ── Clusters ───────────────────────────────────────────────────

    fn get_clusters(
        &self,
        sensitive: bool,
        enterprise_only: bool,
    ) -> StateResult<Vec<TrackedCluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut clusters: Vec<TrackedCluster> = list_records(&table)?;
        if enterprise_only {
            clusters.retain(|c| c.enterprise);
        }
        if !sensitive {
            clusters.iter_mut().for_each(TrackedCluster::redact);
        }
        Ok(clusters)
    }

    fn get_cluster(&self, uuid: &str, sensitive: bool) -> StateResult<TrackedCluster> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut cluster: TrackedCluster = get_record(&table, uuid)?
            .ok_or_else(|| StateError::NotFound(format!("cluster {uuid}")))?;
        if !sensitive {
            cluster.redact();
        }
        Ok(cluster)
    }

    fn add_cluster(&self, cluster: &TrackedCluster) -> StateResult<()> {
        if let Some(alias) = &cluster.alias {
            validate_alias(alias)?;
        }
        let value = encode(cluster)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            if clusters.get(cluster.uuid.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("cluster {}", cluster.uuid)));
            }
            if let Some(alias) = &cluster.alias {
                let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
                if aliases.get(alias.as_str()).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::AlreadyExists(format!("alias {alias}")));
                }
                let row = encode(&ClusterAlias {
                    alias: alias.clone(),
                    cluster_uuid: cluster.uuid.clone(),
                })?;
                aliases
                    .insert(alias.as_str(), row.as_slice())
                    .map_err(map_err!(Write))?;
            }
            clusters
                .insert(cluster.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %cluster.uuid, "cluster stored");
        Ok(())
    }

    fn update_cluster(&self, uuid: &str, mut update: ClusterUpdate) -> StateResult<()> {
        let new_alias = update.alias.take();
        if let Some(alias) = &new_alias {
            validate_alias(alias)?;
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut cluster: TrackedCluster = get_record(&clusters, uuid)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {uuid}")))?;
            update.apply(&mut cluster);

            if let Some(alias) = new_alias.filter(|a| cluster.alias.as_ref() != Some(a)) {
                let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
                if aliases.get(alias.as_str()).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::AlreadyExists(format!("alias {alias}")));
                }
                if let Some(old) = cluster.alias.take() {
                    aliases.remove(old.as_str()).map_err(map_err!(Write))?;
                }
                let row = encode(&ClusterAlias {
                    alias: alias.clone(),
                    cluster_uuid: uuid.to_string(),
                })?;
                aliases
                    .insert(alias.as_str(), row.as_slice())
                    .map_err(map_err!(Write))?;
                cluster.alias = Some(alias);
            }

            let value = encode(&cluster)?;
            clusters
                .insert(uuid, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %uuid, "cluster updated");
        Ok(())
    }

    fn delete_cluster(&self, uuid: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let removed = clusters
                .remove(uuid)
                .map_err(map_err!(Write))?
                .map(|guard| decode::<TrackedCluster>(guard.value()))
                .transpose()?;
            let Some(cluster) = removed else {
                return Err(StateError::NotFound(format!("cluster {uuid}")));
            };
            if let Some(alias) = cluster.alias {
                let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
                aliases.remove(alias.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %uuid, "cluster deleted");
        Ok(())
    }

    // ── Aliases ────────────────────────────────────────────────────

    fn add_alias(&self, alias: &ClusterAlias) -> StateResult<()> {
        validate_alias(&alias.alias)?;
        let row = encode(alias)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;

            let mut cluster: TrackedCluster = get_record(&clusters, &alias.cluster_uuid)?
                .ok_or_else(|| StateError::NotFound(format!("cluster {}", alias.cluster_uuid)))?;
            if aliases.get(alias.alias.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("alias {}", alias.alias)));
            }
            if let Some(existing) = &cluster.alias {
                return Err(StateError::AlreadyExists(format!(
                    "cluster {} already has alias {existing}",
                    cluster.uuid
                )));
            }

            aliases
                .insert(alias.alias.as_str(), row.as_slice())
                .map_err(map_err!(Write))?;
            cluster.alias = Some(alias.alias.clone());
            let value = encode(&cluster)?;
            clusters
                .insert(cluster.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(alias = %alias.alias, cluster = %alias.cluster_uuid, "alias stored");
        Ok(())
    }

    fn delete_alias(&self, alias: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
            let removed = aliases
                .remove(alias)
                .map_err(map_err!(Write))?
                .map(|guard| decode::<ClusterAlias>(guard.value()))
                .transpose()?;
            let Some(row) = removed else {
                return Err(StateError::NotFound(format!("alias {alias}")));
            };

            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let cluster: Option<TrackedCluster> = get_record(&clusters, &row.cluster_uuid)?;
            if let Some(mut cluster) = cluster {
                cluster.alias = None;
                let value = encode(&cluster)?;
                clusters
                    .insert(cluster.uuid.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%alias, "alias deleted");
        Ok(())
    }

    fn get_alias(&self, alias: &str) -> StateResult<ClusterAlias> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALIASES).map_err(map_err!(Table))?;
        get_record(&table, alias)?.ok_or_else(|| StateError::NotFound(format!("alias {alias}")))
    }

    // ── Cloud credentials ──────────────────────────────────────────

    fn add_cloud_credentials(&self, creds: &CloudCredential) -> StateResult<()> {
        self.put(CLOUD_CREDENTIALS, &creds.name, creds)?;
        debug!(name = %creds.name, "cloud credentials stored");
        Ok(())
    }

    fn get_cloud_credentials(&self, sensitive: bool) -> StateResult<Vec<CloudCredential>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLOUD_CREDENTIALS).map_err(map_err!(Table))?;
        let mut creds: Vec<CloudCredential> = list_records(&table)?;
        if !sensitive {
            creds.iter_mut().for_each(|c| c.secret_key.clear());
        }
        Ok(creds)
    }
}
