//! Declare surviving agent nodes, retire vanished ones.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use agentgrid_core::AgentRoleInfo;
use agentgrid_proxy::AgentSchedulerProxy;

/// Declare every agent in `current` and remove every agent in `previous`
/// that is no longer there. Returns the agent roles now declared.
pub fn sync_agent_nodes(
    proxy: &dyn AgentSchedulerProxy,
    previous: &BTreeSet<String>,
    current: &BTreeMap<String, AgentRoleInfo>,
) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();
    for (name, agent) in current {
        if proxy.declare_agent_role(name, &agent.plan) {
            declared.insert(name.clone());
        } else {
            warn!(agent_role = %name, "agent role declaration rejected");
        }
    }

    let mut removed = 0;
    for name in previous {
        if !current.contains_key(name) {
            proxy.remove_agent_role(name);
            removed += 1;
        }
    }
    debug!(declared = declared.len(), removed, "agent nodes synced");
    declared
}
