//! redb table definitions for the cluster state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Tracked clusters keyed by cluster UUID.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Alias rows keyed by alias name.
pub const ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("aliases");

/// Manager users keyed by user name.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Cloud credentials keyed by credential name.
pub const CLOUD_CREDENTIALS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("cloud_credentials");
