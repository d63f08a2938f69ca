//! redb table definitions for the agentgrid state store.

use redb::TableDefinition;

/// Compressed `AssignmentMap` JSON keyed by scheduling scope
/// (`global` for the maintainer, `{app}.{table}.{generation}` per job).
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");
