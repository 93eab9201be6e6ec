//! Redb table definitions for the local metadata cache.

use redb::TableDefinition;

// Key: textual dataset id, Value: JSON-encoded dataset record
pub const DATASET_METAS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("dataset_metas");
