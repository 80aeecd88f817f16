//! redb table definitions for the Fleet group store.
//!
//! Keys are group names; values are JSON-serialized `Group` records.

use redb::TableDefinition;

/// Group definitions keyed by `{name}`.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");
