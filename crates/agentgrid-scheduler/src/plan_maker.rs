//! AgentRolePlanMaker — the per-config scheduling pass.
//!
//! Prototypes (one `AgentRoleInfo` per configured node) are built once per
//! config. Every tick clones them, classifies each desired target role as
//! static, inherited, or pending, runs a greedy heap over each group's
//! pending roles, reclaims idle agents, and returns the surviving agents,
//! the assignment to persist, and the tick's counters.
//!
//! The only state that outlives a tick is the failed-schedule cooldown
//! map, mutated through `&mut self`.

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use agentgrid_core::{
    AgentAssignment, AgentGroup, AgentGroupConfig, AgentRoleInfo, AssignmentMap, BuildId,
    ConfigResult, GroupMatcher, InheritedPlacement, RoleName, TargetRolePlan, agent_role_name,
};
use agentgrid_proxy::AgentSchedulerProxy;

use crate::admission::admits;
use crate::history::AssignmentHistory;
use crate::priority::AgentPriority;
use crate::range_match::RangeTable;
use crate::stats::{GroupScheduleStats, ScheduleStats};

/// Where a plan maker's agent nodes come from.
#[derive(Debug, Clone, Default)]
pub struct PlanMakerOptions {
    /// Set for agent groups pooled across jobs.
    pub global_id: Option<String>,
    pub config_path: String,
    /// Build job owning the nodes; `None` for global agents. Job-local
    /// agent role names are prefixed with the owner's build id.
    pub owner: Option<BuildId>,
}

/// Result of one scheduling tick.
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    /// Surviving agent nodes, keyed by agent role name.
    pub agent_roles: BTreeMap<String, AgentRoleInfo>,
    pub assignment: AssignmentMap,
    pub stats: ScheduleStats,
}

pub struct AgentRolePlanMaker {
    config: AgentGroupConfig,
    matcher: GroupMatcher,
    ranges: RangeTable,
    prototypes: BTreeMap<String, AgentRoleInfo>,
    options: PlanMakerOptions,
    history: Option<Box<dyn AssignmentHistory>>,
    /// target role → last failed greedy attempt (epoch seconds).
    cooldown: HashMap<RoleName, u64>,
}

impl AgentRolePlanMaker {
    /// Validate `config` and build the node prototypes.
    pub fn new(config: AgentGroupConfig, options: PlanMakerOptions) -> ConfigResult<Self> {
        config.check()?;
        let matcher = GroupMatcher::new(&config)?;
        let ranges = RangeTable::new(&config);
        let prototypes = build_prototypes(&config, &options);
        debug!(
            groups = config.agent_node_groups.len(),
            agents = prototypes.len(),
            global_id = options.global_id.as_deref().unwrap_or(""),
            "plan maker initialized"
        );
        Ok(Self {
            config,
            matcher,
            ranges,
            prototypes,
            options,
            history: None,
            cooldown: HashMap::new(),
        })
    }

    /// Read inherited placements from `history` on every tick.
    pub fn with_history(mut self, history: impl AssignmentHistory + 'static) -> Self {
        self.history = Some(Box::new(history));
        self
    }

    pub fn set_history(&mut self, history: impl AssignmentHistory + 'static) {
        self.history = Some(Box::new(history));
    }

    pub fn config(&self) -> &AgentGroupConfig {
        &self.config
    }

    pub fn options(&self) -> &PlanMakerOptions {
        &self.options
    }

    pub fn prototypes(&self) -> &BTreeMap<String, AgentRoleInfo> {
        &self.prototypes
    }

    /// Group index serving `role_name`, memoized.
    pub fn match_role(&mut self, role_name: &str) -> Option<usize> {
        self.matcher.match_role(role_name)
    }

    /// Role names currently memoized by the group matcher.
    pub fn cached_roles(&self) -> usize {
        self.matcher.cached_len()
    }

    pub fn cooldown(&self) -> &HashMap<RoleName, u64> {
        &self.cooldown
    }

    /// Carry cooldown state over from a previous plan maker.
    pub fn restore_cooldown(&mut self, cooldown: HashMap<RoleName, u64>) {
        self.cooldown = cooldown;
    }

    /// Resize group `identifier` and rebuild prototypes. Cooldown survives.
    pub fn set_node_count(&mut self, identifier: &str, node_count: u32) -> ConfigResult<bool> {
        let Some(group) = self
            .config
            .agent_node_groups
            .iter_mut()
            .find(|g| g.identifier == identifier)
        else {
            return Ok(false);
        };
        let previous = group.node_count;
        group.node_count = node_count;
        if let Err(e) = self.config.check() {
            if let Some(group) = self
                .config
                .agent_node_groups
                .iter_mut()
                .find(|g| g.identifier == identifier)
            {
                group.node_count = previous;
            }
            return Err(e);
        }
        self.ranges = RangeTable::new(&self.config);
        self.prototypes = build_prototypes(&self.config, &self.options);
        info!(%identifier, previous, node_count, "agent group resized");
        Ok(true)
    }

    /// Run one scheduling tick over `roles`.
    ///
    /// Roles matching no group pattern are counted and ignored.
    pub fn make_plan(&mut self, proxy: &dyn AgentSchedulerProxy, roles: &TargetRolePlan, now: u64) -> PlanOutcome {
        let mut stats = ScheduleStats {
            global_id: self.options.global_id.clone(),
            unmatched: 0,
            groups: self
                .config
                .agent_node_groups
                .iter()
                .map(|g| GroupScheduleStats {
                    identifier: g.identifier.clone(),
                    node_count: g.node_count,
                    ..GroupScheduleStats::default()
                })
                .collect(),
        };

        let mut agents = self.prototypes.clone();
        let prior = self
            .history
            .as_ref()
            .map(|h| h.prior_assignment())
            .unwrap_or_else(|| Arc::new(AssignmentMap::new()));
        let inherited = if self.config.is_dynamic() {
            prior.inherited_placements()
        } else {
            BTreeMap::new()
        };

        // Classification pass.
        let mut pending: BTreeMap<usize, Vec<&RoleName>> = BTreeMap::new();
        for (name, role) in roles {
            let Some(gi) = self.matcher.match_role(name) else {
                stats.unmatched += 1;
                continue;
            };
            let group = &self.config.agent_node_groups[gi];
            let counters = &mut stats.groups[gi];
            counters.matched += 1;

            if !group.dynamic_role_mapping {
                let node = self.ranges.match_node(gi, name, &role.partition_range());
                if let Some(node) = node {
                    let agent_name = agent_role_name(
                        self.options.global_id.as_deref(),
                        &group.identifier,
                        node as u32,
                    );
                    if let Some(agent) = agents.get_mut(&agent_name)
                        && admits(group, agent, role, roles)
                    {
                        agent.target_roles.insert(name.clone());
                        counters.static_placed += 1;
                        debug!(target_role = %name, agent_role = %agent_name, "static placement");
                        continue;
                    }
                }
            } else if let Some(placement) = inherited.get(name)
                && inheritable(proxy, gi, name, placement, &agents)
                && let Some(agent) = agents.get_mut(&placement.agent_role)
                && admits(group, agent, role, roles)
            {
                agent.target_roles.insert(name.clone());
                counters.inherited += 1;
                debug!(target_role = %name, agent_role = %placement.agent_role, "inherited placement");
                continue;
            }
            pending.entry(gi).or_default().push(name);
        }

        // Greedy pass.
        for (gi, queued) in pending {
            let group = &self.config.agent_node_groups[gi];
            let counters = &mut stats.groups[gi];
            let mut heap: BinaryHeap<AgentPriority> = agents
                .values()
                .filter(|a| a.group_index == gi)
                .map(|a| {
                    AgentPriority::new(
                        a,
                        prior.contains_agent(&a.name),
                        proxy.is_agent_service_ready(&a.name),
                        proxy.agent_node_black_list_timestamp(&a.name).unwrap_or(0),
                    )
                })
                .collect();

            for name in queued {
                if let Some(&failed_at) = self.cooldown.get(name)
                    && now.saturating_sub(failed_at) < group.in_black_list_timeout
                {
                    counters.cooling_down += 1;
                    counters.unassigned += 1;
                    debug!(target_role = %name, failed_at, "target role cooling down");
                    continue;
                }

                let role = &roles[name];
                let mut rejected = Vec::new();
                let mut placed = None;
                while let Some(mut candidate) = heap.pop() {
                    if proxy.is_in_black_list(name, &candidate.name) {
                        rejected.push(candidate);
                        continue;
                    }
                    let admitted = agents
                        .get(&candidate.name)
                        .is_some_and(|agent| admits(group, agent, role, roles));
                    if !admitted {
                        rejected.push(candidate);
                        continue;
                    }
                    if let Some(agent) = agents.get_mut(&candidate.name) {
                        agent.target_roles.insert(name.clone());
                    }
                    candidate.load += 1;
                    placed = Some(candidate.name.clone());
                    heap.push(candidate);
                    break;
                }
                heap.extend(rejected);

                match placed {
                    Some(agent_role) => {
                        self.cooldown.remove(name);
                        counters.dynamic_placed += 1;
                        debug!(target_role = %name, %agent_role, "dynamic placement");
                    }
                    None => {
                        self.cooldown.insert(name.clone(), now);
                        counters.unassigned += 1;
                        warn!(target_role = %name, group = %group.identifier, "no eligible agent for target role");
                    }
                }
            }
        }
        self.cooldown.retain(|role, _| roles.contains_key(role));
        self.matcher.retain(|role| roles.contains_key(role));

        // Idle reclamation.
        for (gi, group) in self.config.agent_node_groups.iter().enumerate() {
            let mut idle: Vec<(u32, String)> = agents
                .values()
                .filter(|a| a.group_index == gi && a.is_idle())
                .map(|a| (a.node_index, a.name.clone()))
                .collect();
            idle.sort();
            let counters = &mut stats.groups[gi];
            counters.idle = idle.len();

            let release: Vec<String> = reclaimable(group, idle, &prior);
            counters.released = release.len();
            for name in release {
                agents.remove(&name);
            }
        }

        // Finalize.
        let mut assignment = AssignmentMap::new();
        for agent in agents.values() {
            let counters = &mut stats.groups[agent.group_index];
            if !agent.is_idle() {
                counters.assigned += 1;
            }
            if proxy.is_agent_service_ready(&agent.name) {
                counters.ready += 1;
            }
            assignment.insert(
                &agent.name,
                AgentAssignment {
                    identifier: proxy.agent_identifier(&agent.name).identifier,
                    target_roles: agent.target_roles.iter().cloned().collect(),
                },
            );
        }

        debug!(
            agents = agents.len(),
            placed = stats.placed(),
            unassigned = stats.unassigned(),
            unmatched = stats.unmatched,
            "plan made"
        );
        PlanOutcome {
            agent_roles: agents,
            assignment,
            stats,
        }
    }
}

fn build_prototypes(config: &AgentGroupConfig, options: &PlanMakerOptions) -> BTreeMap<String, AgentRoleInfo> {
    let prefix = options
        .global_id
        .clone()
        .or_else(|| options.owner.as_ref().map(BuildId::to_string));
    let mut prototypes = BTreeMap::new();
    for (gi, group) in config.agent_node_groups.iter().enumerate() {
        for node_index in 0..group.node_count {
            let name = agent_role_name(prefix.as_deref(), &group.identifier, node_index);
            let mut plan = group.agent_node_plan.clone();
            plan.owner = options.owner.clone();
            plan.black_list_timeout = Some(group.in_black_list_timeout);
            prototypes.insert(
                name.clone(),
                AgentRoleInfo {
                    name,
                    plan,
                    target_roles: Default::default(),
                    group_index: gi,
                    node_index,
                    config_path: options.config_path.clone(),
                    is_dynamic_mapping: group.dynamic_role_mapping,
                    is_global_agent: options.global_id.is_some(),
                },
            );
        }
    }
    prototypes
}

/// Whether a previously placed role may stay on its agent.
fn inheritable(
    proxy: &dyn AgentSchedulerProxy,
    group_index: usize,
    target_role: &str,
    placement: &InheritedPlacement,
    agents: &BTreeMap<String, AgentRoleInfo>,
) -> bool {
    let agent_role = placement.agent_role.as_str();
    let Some(agent) = agents.get(agent_role) else {
        warn!(%target_role, %agent_role, "inherited agent no longer configured");
        return false;
    };
    if agent.group_index != group_index {
        debug!(%target_role, %agent_role, "inherited agent belongs to another group");
        return false;
    }
    if proxy.is_in_black_list(target_role, agent_role) {
        debug!(%target_role, %agent_role, "inherited agent blacklisted");
        return false;
    }
    let live = proxy.agent_identifier(agent_role);
    if live.synced {
        if live.identifier.is_empty() {
            debug!(%target_role, %agent_role, "inherited agent reclaimed");
            return false;
        }
        if !placement.identifier.is_empty() && live.identifier != placement.identifier {
            debug!(
                %target_role,
                %agent_role,
                previous = %placement.identifier,
                current = %live.identifier,
                "inherited agent identifier changed"
            );
            return false;
        }
    }
    true
}

/// Idle agents `group` lets go of, given idle `(node_index, name)` sorted
/// by node index.
fn reclaimable(group: &AgentGroup, idle: Vec<(u32, String)>, prior: &AssignmentMap) -> Vec<String> {
    if group.flexible_idle_agent_count > 0 {
        idle.into_iter()
            .skip(group.flexible_idle_agent_count as usize)
            .map(|(_, name)| name)
            .collect()
    } else if group.lazy_allocate {
        idle.into_iter()
            .filter(|(_, name)| !prior.contains_agent(name))
            .map(|(_, name)| name)
            .collect()
    } else {
        Vec::new()
    }
}
