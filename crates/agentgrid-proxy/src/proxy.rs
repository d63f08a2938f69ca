//! The scheduler proxy contract consumed by the plan maker.

use std::collections::BTreeSet;

use agentgrid_core::{AgentNodePlan, BuildId};

use crate::slot::SlotInfo;

/// Live identifier of an agent node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentifier {
    /// `false` while a new identifier is still propagating; callers must
    /// not treat an unsynced identifier as a change.
    pub synced: bool,
    /// Empty when the agent has no slot (never started or reclaimed).
    pub identifier: String,
}

impl AgentIdentifier {
    pub fn synced(identifier: &str) -> Self {
        Self {
            synced: true,
            identifier: identifier.to_string(),
        }
    }

    pub fn pending(identifier: &str) -> Self {
        Self {
            synced: false,
            identifier: identifier.to_string(),
        }
    }
}

/// Live agent state and agent-node lifecycle, as seen by a plan maker.
pub trait AgentSchedulerProxy: Send + Sync {
    fn agent_identifier(&self, agent_role: &str) -> AgentIdentifier;

    fn is_agent_service_ready(&self, agent_role: &str) -> bool;

    /// Whether `agent_role` is currently blacklisted for `target_role`.
    fn is_in_black_list(&self, target_role: &str, agent_role: &str) -> bool;

    fn in_black_list_agent_roles(&self, target_role: &str) -> BTreeSet<String>;

    /// When `agent_role` was last blacklisted for any target role.
    fn agent_node_black_list_timestamp(&self, agent_role: &str) -> Option<u64>;

    fn declare_agent_role(&self, agent_role: &str, plan: &AgentNodePlan) -> bool;

    fn remove_agent_role(&self, agent_role: &str);

    /// Retire agent nodes owned by build jobs that are no longer active.
    fn remove_useless_agent_nodes(&self, active_build_ids: &BTreeSet<BuildId>);

    /// Blacklist the agent hosting `target_role` on one of
    /// `observed_slots`. Returns the blacklisted agent role.
    fn add_target_role_to_black_list(
        &self,
        target_role: &str,
        observed_slots: &[SlotInfo],
    ) -> Option<String>;
}
