use std::sync::Arc;

use agentgrid_core::AssignmentMap;

/// Source of the previously persisted assignment.
pub trait AssignmentHistory: Send + Sync {
    fn prior_assignment(&self) -> Arc<AssignmentMap>;
}

impl<F> AssignmentHistory for F
where
    F: Fn() -> Arc<AssignmentMap> + Send + Sync,
{
    fn prior_assignment(&self) -> Arc<AssignmentMap> {
        self()
    }
}
