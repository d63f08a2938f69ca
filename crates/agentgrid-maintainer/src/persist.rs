//! Write-on-change persistence of one assignment scope.

use std::sync::Arc;

use tracing::{error, info};

use agentgrid_core::AssignmentMap;
use agentgrid_state::AssignmentStore;

use crate::error::MaintainerResult;

pub(crate) struct PersistedAssignment {
    scope: String,
    store: Arc<dyn AssignmentStore>,
    /// Serialized form of the last assignment read or written.
    last: Option<String>,
}

impl PersistedAssignment {
    /// Read what `scope` holds. A failed read is an error, not an empty
    /// history.
    pub(crate) fn recover(
        scope: &str,
        store: Arc<dyn AssignmentStore>,
    ) -> MaintainerResult<(Self, Option<AssignmentMap>)> {
        let recovered = store.read_assignment(scope).map_err(|e| {
            error!(%scope, error = %e, "failed to read persisted assignment");
            e
        })?;
        let last = match &recovered {
            Some(map) => Some(map.to_json()?),
            None => None,
        };
        let persisted = Self {
            scope: scope.to_string(),
            store,
            last,
        };
        Ok((persisted, recovered))
    }

    /// Store `assignment` unless it serializes to what was stored last.
    /// Returns whether a write happened.
    pub(crate) fn write_if_changed(&mut self, assignment: &AssignmentMap) -> MaintainerResult<bool> {
        let json = assignment.to_json()?;
        if self.last.as_deref() == Some(json.as_str()) {
            return Ok(false);
        }
        if let Err(e) = self.store.write_assignment(&self.scope, assignment) {
            error!(scope = %self.scope, error = %e, "failed to persist assignment");
            return Err(e.into());
        }
        self.last = Some(json);
        info!(scope = %self.scope, agents = assignment.len(), "assignment persisted");
        Ok(true)
    }
}
