//! SingleGlobalAgentGroup — one shared agent pool and its plan maker.

use std::mem;

use tracing::debug;

use agentgrid_core::{
    AssignmentMap, ConfigResult, GlobalGroupConfig, Snapshot, TargetRole, TargetRolePlan,
    package_signature,
};
use agentgrid_proxy::AgentSchedulerProxy;
use agentgrid_scheduler::{AgentRolePlanMaker, PlanMakerOptions, PlanOutcome};

pub struct SingleGlobalAgentGroup {
    global_id: String,
    package_signature: Option<String>,
    plan_maker: AgentRolePlanMaker,
    /// Roles routed here for the current tick.
    pending: TargetRolePlan,
}

impl SingleGlobalAgentGroup {
    /// Build the group; its plan maker inherits from `history`.
    pub fn new(config: &GlobalGroupConfig, config_path: &str, history: Snapshot<AssignmentMap>) -> ConfigResult<Self> {
        let options = PlanMakerOptions {
            global_id: Some(config.global_id.clone()),
            config_path: config_path.to_string(),
            owner: None,
        };
        let plan_maker =
            AgentRolePlanMaker::new(config.groups.clone(), options)?.with_history(move || history.load());
        Ok(Self {
            global_id: config.global_id.clone(),
            package_signature: package_signature(&config.packages),
            plan_maker,
            pending: TargetRolePlan::new(),
        })
    }

    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    pub fn package_signature(&self) -> Option<&str> {
        self.package_signature.as_deref()
    }

    pub fn plan_maker(&self) -> &AgentRolePlanMaker {
        &self.plan_maker
    }

    pub fn plan_maker_mut(&mut self) -> &mut AgentRolePlanMaker {
        &mut self.plan_maker
    }

    /// Whether `agent_role` is one of this group's agent nodes.
    pub fn hosts_agent(&self, agent_role: &str) -> bool {
        self.plan_maker.prototypes().contains_key(agent_role)
    }

    pub fn pending(&self) -> &TargetRolePlan {
        &self.pending
    }

    /// Whether `role` may be routed here.
    ///
    /// The role's package signature must equal the group's, its name must
    /// match one of the group's patterns, and `target_group_id`, when set,
    /// must name this group.
    pub fn accepts(&mut self, role: &TargetRole, target_group_id: Option<&str>) -> bool {
        if target_group_id.is_some_and(|id| id != self.global_id) {
            return false;
        }
        let Some(signature) = self.package_signature.as_deref() else {
            return false;
        };
        if role.package_signature().as_deref() != Some(signature) {
            return false;
        }
        self.plan_maker.match_role(&role.name).is_some()
    }

    pub fn add_role(&mut self, role: TargetRole) {
        debug!(global_id = %self.global_id, target_role = %role.name, "target role routed");
        self.pending.insert(role.name.clone(), role);
    }

    /// Schedule the routed roles and clear them.
    pub fn make_plan(&mut self, proxy: &dyn AgentSchedulerProxy, now: u64) -> PlanOutcome {
        let roles = mem::take(&mut self.pending);
        self.plan_maker.make_plan(proxy, &roles, now)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
