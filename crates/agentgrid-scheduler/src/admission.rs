//! Resource-oversell admission control.

use agentgrid_core::{AgentGroup, AgentRoleInfo, TargetRole, TargetRolePlan};

/// Whether `agent` can take `candidate` on top of what it already hosts.
///
/// Exclusive groups only admit onto empty agents. Each resource limit
/// caps the summed request at `amount * oversell_factor`. A group with
/// neither admits everything.
pub fn admits(group: &AgentGroup, agent: &AgentRoleInfo, candidate: &TargetRole, plan: &TargetRolePlan) -> bool {
    if group.exclusive && !agent.is_idle() {
        return false;
    }
    group.resource_limits.iter().all(|limit| {
        let resource = limit.resource_name.as_str();
        let used = agent.used_resource(resource, plan) + candidate.resource(resource);
        let capacity = agent.plan.resource_amount(resource) as f64 * limit.oversell_factor;
        used as f64 <= capacity
    })
}
