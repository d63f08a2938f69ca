//! StateStore — redb-backed persistence for assignment history.
//!
//! Every value is an `AssignmentMap` serialized to JSON and gzip
//! compressed. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use agentgrid_core::AssignmentMap;

use crate::codec::{compress, decompress};
use crate::error::{StateError, StateResult};
use crate::tables::ASSIGNMENTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Where schedulers read and write their durable assignment.
///
/// Implemented by `StateStore`; other coordination stores can stand in.
pub trait AssignmentStore: Send + Sync {
    fn read_assignment(&self, scope: &str) -> StateResult<Option<AssignmentMap>>;

    fn write_assignment(&self, scope: &str, assignment: &AssignmentMap) -> StateResult<()>;
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

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace the assignment of a scope.
    pub fn put_assignment(&self, scope: &str, assignment: &AssignmentMap) -> StateResult<()> {
        let json = serde_json::to_vec(assignment).map_err(map_err!(Serialize))?;
        let value = compress(&json)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            table
                .insert(scope, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%scope, agents = assignment.len(), bytes = value.len(), "assignment stored");
        Ok(())
    }

    /// Get the assignment of a scope; `None` if it was never written.
    pub fn get_assignment(&self, scope: &str) -> StateResult<Option<AssignmentMap>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        match table.get(scope).map_err(map_err!(Read))? {
            Some(guard) => {
                let json = decompress(guard.value())?;
                let assignment: AssignmentMap =
                    serde_json::from_slice(&json).map_err(map_err!(Deserialize))?;
                Ok(Some(assignment))
            }
            None => Ok(None),
        }
    }

    /// Delete the assignment of a scope. Returns true if it existed.
    pub fn delete_assignment(&self, scope: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            existed = table.remove(scope).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%scope, existed, "assignment deleted");
        Ok(existed)
    }

    /// All scopes with a stored assignment.
    pub fn list_scopes(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        let mut scopes = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            scopes.push(key.value().to_string());
        }
        Ok(scopes)
    }
}

impl AssignmentStore for StateStore {
    fn read_assignment(&self, scope: &str) -> StateResult<Option<AssignmentMap>> {
        self.get_assignment(scope)
    }

    fn write_assignment(&self, scope: &str, assignment: &AssignmentMap) -> StateResult<()> {
        self.put_assignment(scope, assignment)
    }
}
