//! GlobalAgentMaintainer — routes, schedules, persists, and publishes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use agentgrid_autoscale::{FlexibleScaler, FlexibleUpdate, GroupLoad};
use agentgrid_core::{
    AgentRoleInfo, AssignmentMap, BuildId, GlobalAgentConfig, RoleName, Snapshot, TargetRolePlan,
};
use agentgrid_proxy::AgentSchedulerProxy;
use agentgrid_scheduler::{ScheduleStats, sync_agent_nodes};
use agentgrid_state::AssignmentStore;

use crate::error::{MaintainerError, MaintainerResult};
use crate::group::SingleGlobalAgentGroup;
use crate::persist::PersistedAssignment;

/// Store scope holding the merged global assignment.
pub const GLOBAL_SCOPE: &str = "global";

/// Merged result of one tick.
#[derive(Debug, Clone, Default)]
pub struct GlobalPlan {
    pub agent_roles: BTreeMap<String, AgentRoleInfo>,
    pub assignment: AssignmentMap,
    /// Whether the assignment changed and was written to the store.
    pub persisted: bool,
}

/// Per-group counters of the last tick, for readers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleInfo {
    pub updated_at: u64,
    pub groups: Vec<ScheduleStats>,
}

/// Build ids of every job with a role in `plan`.
pub fn active_build_ids(plan: &TargetRolePlan) -> BTreeSet<BuildId> {
    plan.values().map(|role| role.build_id.clone()).collect()
}

pub struct GlobalAgentMaintainer {
    config: GlobalAgentConfig,
    config_path: Option<PathBuf>,
    groups: Vec<SingleGlobalAgentGroup>,
    persisted: PersistedAssignment,
    assignment: Snapshot<AssignmentMap>,
    schedule_info: Snapshot<ScheduleInfo>,
    /// Agent roles declared through the proxy by the last tick.
    declared: BTreeSet<String>,
    /// Group index routing starts from on the next `add_target_role_plan`.
    cursor: usize,
    /// target role → global id it was routed to by the last tick.
    routes: BTreeMap<RoleName, String>,
    scaler: FlexibleScaler,
    /// `{globalId}.{groupId}` → load seen by the last tick.
    loads: BTreeMap<String, GroupLoad>,
}

impl GlobalAgentMaintainer {
    /// Validate `config`, recover the persisted assignment, and build groups.
    ///
    /// A failed read of the persisted assignment fails initialization.
    pub fn load(
        config: GlobalAgentConfig,
        store: Arc<dyn AssignmentStore>,
        config_path: Option<PathBuf>,
    ) -> MaintainerResult<Self> {
        config.check()?;
        let (persisted, recovered) = PersistedAssignment::recover(GLOBAL_SCOPE, store)?;
        let assignment = Snapshot::new(recovered.unwrap_or_default());
        let groups = build_groups(&config, config_path.as_deref(), &assignment)?;

        info!(
            groups = groups.len(),
            recovered_agents = assignment.load().len(),
            "global agent maintainer loaded"
        );
        Ok(Self {
            scaler: FlexibleScaler::new(config.flexible_scale_config.clone()),
            config,
            config_path,
            groups,
            persisted,
            assignment,
            schedule_info: Snapshot::default(),
            declared: BTreeSet::new(),
            cursor: 0,
            routes: BTreeMap::new(),
            loads: BTreeMap::new(),
        })
    }

    /// Load the config from `path` and keep it as the store target.
    pub fn load_from_file(path: &Path, store: Arc<dyn AssignmentStore>) -> MaintainerResult<Self> {
        let config = GlobalAgentConfig::from_file(path)?;
        Self::load(config, store, Some(path.to_path_buf()))
    }

    pub fn config(&self) -> &GlobalAgentConfig {
        &self.config
    }

    pub fn groups(&self) -> &[SingleGlobalAgentGroup] {
        &self.groups
    }

    /// Last published assignment.
    pub fn assignment(&self) -> Arc<AssignmentMap> {
        self.assignment.load()
    }

    /// Handle readers can keep to observe later publications.
    pub fn assignment_snapshot(&self) -> Snapshot<AssignmentMap> {
        self.assignment.clone()
    }

    pub fn schedule_info(&self) -> Arc<ScheduleInfo> {
        self.schedule_info.load()
    }

    pub fn schedule_info_snapshot(&self) -> Snapshot<ScheduleInfo> {
        self.schedule_info.clone()
    }

    /// Route one job's roles into groups. Returns how many were routed.
    ///
    /// Roles in `excluded` or already routed this tick are skipped. A role
    /// stays with the group hosting it in the published assignment, or the
    /// group it was last routed to, while that group still accepts it.
    /// Any other role goes to the first accepting group, starting from a
    /// cursor that advances on every call.
    pub fn add_target_role_plan(
        &mut self,
        job_plan: &TargetRolePlan,
        excluded: &BTreeSet<String>,
        config_path: &str,
        target_group_id: Option<&str>,
    ) -> usize {
        let count = self.groups.len();
        if count == 0 {
            return 0;
        }
        let start = self.cursor % count;
        self.cursor = (start + 1) % count;

        let prior = self.assignment.load();
        let mut routed = 0;
        for (name, role) in job_plan {
            if excluded.contains(name) || self.is_routed(name) {
                continue;
            }
            if let Some(gi) = self.previous_group(&prior, name)
                && self.groups[gi].accepts(role, target_group_id)
            {
                self.groups[gi].add_role(role.clone());
                routed += 1;
                continue;
            }
            for offset in 0..count {
                let group = &mut self.groups[(start + offset) % count];
                if group.accepts(role, target_group_id) {
                    group.add_role(role.clone());
                    routed += 1;
                    break;
                }
            }
        }
        debug!(%config_path, routed, total = job_plan.len(), "job role plan routed");
        routed
    }

    /// Whether `role_name` is routed to a global group for the coming tick.
    pub fn is_routed(&self, role_name: &str) -> bool {
        self.groups.iter().any(|g| g.pending().contains_key(role_name))
    }

    /// Index of the group `role_name` was scheduled by last.
    fn previous_group(&self, prior: &AssignmentMap, role_name: &str) -> Option<usize> {
        if let Some(agent_role) = prior.agent_of(role_name)
            && let Some(gi) = self.groups.iter().position(|g| g.hosts_agent(agent_role))
        {
            return Some(gi);
        }
        let global_id = self.routes.get(role_name)?;
        self.groups.iter().position(|g| g.global_id() == global_id)
    }

    pub fn make_plan(&mut self, proxy: &dyn AgentSchedulerProxy) -> MaintainerResult<GlobalPlan> {
        self.make_plan_at(proxy, epoch_secs())
    }

    /// Schedule every group, merge, persist when changed, publish.
    ///
    /// Routing state is reset even when persisting fails.
    pub fn make_plan_at(&mut self, proxy: &dyn AgentSchedulerProxy, now: u64) -> MaintainerResult<GlobalPlan> {
        let mut agent_roles = BTreeMap::new();
        let mut assignment = AssignmentMap::new();
        let mut stats = Vec::with_capacity(self.groups.len());
        self.routes = self
            .groups
            .iter()
            .flat_map(|g| {
                g.pending()
                    .keys()
                    .map(|name| (name.clone(), g.global_id().to_string()))
            })
            .collect();

        for group in &mut self.groups {
            let outcome = group.make_plan(proxy, now);
            for counters in &outcome.stats.groups {
                self.loads.insert(
                    format!("{}.{}", group.global_id(), counters.identifier),
                    GroupLoad {
                        total: counters.node_count,
                        idle: counters.idle as u32,
                    },
                );
            }
            agent_roles.extend(outcome.agent_roles);
            assignment.merge(outcome.assignment);
            stats.push(outcome.stats);
        }
        self.reset();

        let persisted = self.persisted.write_if_changed(&assignment)?;

        self.assignment.store(assignment.clone());
        self.schedule_info.store(ScheduleInfo {
            updated_at: now,
            groups: stats,
        });
        self.declared = sync_agent_nodes(proxy, &self.declared, &agent_roles);

        Ok(GlobalPlan {
            agent_roles,
            assignment,
            persisted,
        })
    }

    /// Route all of `desired` and run one tick.
    pub fn plan_for(
        &mut self,
        proxy: &dyn AgentSchedulerProxy,
        desired: &TargetRolePlan,
        now: u64,
    ) -> MaintainerResult<GlobalPlan> {
        self.add_target_role_plan(desired, &BTreeSet::new(), "", None);
        self.make_plan_at(proxy, now)
    }

    /// Drop roles routed since the last tick.
    pub fn reset(&mut self) {
        for group in &mut self.groups {
            group.reset();
        }
    }

    /// Node-count changes the flexible scale config asks for, based on the
    /// last tick's loads.
    pub fn flexible_update_plan(&self, now: u64) -> Vec<FlexibleUpdate> {
        self.scaler
            .evaluate_all(&self.loads, &self.config.flexible_update_log, now)
    }

    /// Resize a global group, record the update time, and store the config.
    pub fn apply_flexible_update(&mut self, update: &FlexibleUpdate, now: u64) -> MaintainerResult<()> {
        let key = update.target_key();
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.global_id() == update.global_id)
            .ok_or_else(|| MaintainerError::UnknownFlexibleTarget(key.clone()))?;
        if !group.plan_maker_mut().set_node_count(&update.group_id, update.to)? {
            return Err(MaintainerError::UnknownFlexibleTarget(key));
        }
        if let Some(entry) = self.config.find_group_mut(&update.global_id, &update.group_id) {
            entry.node_count = update.to;
        }
        self.config.flexible_update_log.insert(key.clone(), now);
        if let Some(load) = self.loads.get_mut(&key) {
            load.total = update.to;
        }
        info!(target = %key, from = update.from, to = update.to, "flexible update applied");
        self.store_config()
    }

    /// Compute and apply every flexible update due at `now`.
    pub fn run_flexible_updates(&mut self, now: u64) -> MaintainerResult<Vec<FlexibleUpdate>> {
        let updates = self.flexible_update_plan(now);
        for update in &updates {
            self.apply_flexible_update(update, now)?;
        }
        Ok(updates)
    }

    /// Swap in a new config, validated as a whole first.
    ///
    /// On failure the current config and groups stay in place. Groups
    /// whose global id survives keep their cooldown state.
    pub fn update_config(&mut self, config: GlobalAgentConfig) -> MaintainerResult<()> {
        if let Err(e) = config.check() {
            warn!(error = %e, "config reload rejected");
            return Err(e.into());
        }
        let mut groups = match build_groups(&config, self.config_path.as_deref(), &self.assignment) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "config reload rejected");
                return Err(e);
            }
        };
        for group in &mut groups {
            if let Some(old) = self.groups.iter().find(|g| g.global_id() == group.global_id()) {
                group
                    .plan_maker_mut()
                    .restore_cooldown(old.plan_maker().cooldown().clone());
            }
        }

        self.scaler = FlexibleScaler::new(config.flexible_scale_config.clone());
        self.config = config;
        self.groups = groups;
        self.cursor = 0;
        info!(groups = self.groups.len(), "global agent config updated");
        Ok(())
    }

    /// Re-read the config file and apply it.
    pub fn reload_config(&mut self) -> MaintainerResult<()> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        let config = match GlobalAgentConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(?path, error = %e, "config reload rejected");
                return Err(e.into());
            }
        };
        self.update_config(config)
    }

    fn store_config(&self) -> MaintainerResult<()> {
        if let Some(path) = &self.config_path {
            self.config.write_to_file(path)?;
        }
        Ok(())
    }
}

fn build_groups(
    config: &GlobalAgentConfig,
    config_path: Option<&Path>,
    history: &Snapshot<AssignmentMap>,
) -> MaintainerResult<Vec<SingleGlobalAgentGroup>> {
    let path = config_path
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    config
        .global_agent_groups
        .iter()
        .map(|global| SingleGlobalAgentGroup::new(global, &path, history.clone()).map_err(Into::into))
        .collect()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgrid_core::{AgentGroup, AgentGroupConfig, FlexibleScaleConfig, GlobalGroupConfig, TargetRole};
    use agentgrid_proxy::{InMemorySlotScheduler, SlotSchedulerProxy};
    use agentgrid_state::StateStore;

    const PKG: &str = "pkg://indexer/1.0";

    fn global_group(global_id: &str, node_count: u32) -> GlobalGroupConfig {
        let mut group = AgentGroup::new("proc", "app\\..*", node_count);
        group.dynamic_role_mapping = true;
        GlobalGroupConfig {
            global_id: global_id.to_string(),
            packages: vec![PKG.to_string()],
            groups: AgentGroupConfig::new(vec![group]),
        }
    }

    fn test_config(globals: Vec<GlobalGroupConfig>) -> GlobalAgentConfig {
        GlobalAgentConfig {
            global_agent_groups: globals,
            ..GlobalAgentConfig::default()
        }
    }

    fn make_roles(names: &[&str]) -> TargetRolePlan {
        names
            .iter()
            .map(|n| {
                let role = TargetRole::new(n, BuildId::new("app", "t", 1)).with_packages(&[PKG]);
                (n.to_string(), role)
            })
            .collect()
    }

    fn make_proxy() -> SlotSchedulerProxy<InMemorySlotScheduler> {
        SlotSchedulerProxy::new(Arc::new(InMemorySlotScheduler::new()))
    }

    fn make_maintainer(config: GlobalAgentConfig) -> GlobalAgentMaintainer {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        GlobalAgentMaintainer::load(config, store, None).unwrap()
    }

    #[test]
    fn invalid_config_fails_load() {
        let config = test_config(vec![global_group("a", 1), global_group("a", 1)]);
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        assert!(matches!(
            GlobalAgentMaintainer::load(config, store, None),
            Err(MaintainerError::Config(_))
        ));
    }

    #[test]
    fn routing_start_rotates_between_jobs() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 1), global_group("b", 1)]));
        let none = BTreeSet::new();

        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r0"]), &none, "job1.json", None);
        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r1"]), &none, "job2.json", None);

        assert!(maintainer.groups()[0].pending().contains_key("app.t.1.r0"));
        assert!(maintainer.groups()[1].pending().contains_key("app.t.1.r1"));
    }

    #[test]
    fn excluded_and_filtered_roles_not_routed() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 1), global_group("b", 1)]));
        let excluded: BTreeSet<String> = ["app.t.1.r0".to_string()].into_iter().collect();
        let routed = maintainer.add_target_role_plan(
            &make_roles(&["app.t.1.r0", "app.t.1.r1"]),
            &excluded,
            "job.json",
            Some("b"),
        );

        assert_eq!(routed, 1);
        assert!(maintainer.groups()[0].pending().is_empty());
        assert!(maintainer.groups()[1].pending().contains_key("app.t.1.r1"));
    }

    #[test]
    fn role_routed_once_per_tick() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 1), global_group("b", 1)]));
        let roles = make_roles(&["app.t.1.r0"]);
        let none = BTreeSet::new();
        assert_eq!(maintainer.add_target_role_plan(&roles, &none, "", None), 1);
        assert_eq!(maintainer.add_target_role_plan(&roles, &none, "", None), 0);
    }

    #[test]
    fn placed_role_stays_with_its_group() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 1), global_group("b", 1)]));
        let proxy = make_proxy();
        let roles = make_roles(&["app.t.1.r0"]);

        let first = maintainer.plan_for(&proxy, &roles, 100).unwrap();
        assert_eq!(first.assignment.agent_of("app.t.1.r0"), Some("a.proc.agent.0"));
        for now in 101..104 {
            let plan = maintainer.plan_for(&proxy, &roles, now).unwrap();
            assert_eq!(plan.assignment.agent_of("app.t.1.r0"), Some("a.proc.agent.0"));
            assert!(!plan.persisted);
        }
    }

    #[test]
    fn unplaced_role_stays_routed_while_cooling_down() {
        let exclusive = |global_id: &str| {
            let mut config = global_group(global_id, 1);
            config.groups.agent_node_groups[0].exclusive = true;
            config
        };
        let mut maintainer = make_maintainer(test_config(vec![exclusive("a"), exclusive("b")]));
        let proxy = make_proxy();
        let roles = make_roles(&["app.t.1.r0", "app.t.1.r1"]);

        // One job's roles all start at group a; r1 finds no room there.
        let plan = maintainer.plan_for(&proxy, &roles, 100).unwrap();
        assert_eq!(plan.assignment.agent_of("app.t.1.r0"), Some("a.proc.agent.0"));
        assert_eq!(plan.assignment.agent_of("app.t.1.r1"), None);

        let plan = maintainer.plan_for(&proxy, &roles, 101).unwrap();
        assert_eq!(plan.assignment.agent_of("app.t.1.r1"), None);
        let info = maintainer.schedule_info();
        assert_eq!(info.groups[0].groups[0].cooling_down, 1);
        assert_eq!(info.groups[1].groups[0].matched, 0);
    }

    #[test]
    fn make_plan_merges_and_persists_on_change() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 1), global_group("b", 1)]));
        let proxy = make_proxy();
        let none = BTreeSet::new();
        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r0"]), &none, "", None);
        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r1"]), &none, "", None);

        let plan = maintainer.make_plan_at(&proxy, 100).unwrap();
        assert!(plan.persisted);
        assert_eq!(plan.assignment.agent_of("app.t.1.r0"), Some("a.proc.agent.0"));
        assert_eq!(plan.assignment.agent_of("app.t.1.r1"), Some("b.proc.agent.0"));
        assert_eq!(maintainer.assignment().len(), 2);
        assert!(maintainer.groups().iter().all(|g| g.pending().is_empty()));

        // Same roles again: nothing changes, nothing written.
        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r0"]), &none, "", None);
        maintainer.add_target_role_plan(&make_roles(&["app.t.1.r1"]), &none, "", None);
        let plan = maintainer.make_plan_at(&proxy, 101).unwrap();
        assert!(!plan.persisted);
    }

    #[test]
    fn make_plan_declares_agents_and_publishes_info() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 2)]));
        let proxy = make_proxy();
        maintainer
            .plan_for(&proxy, &make_roles(&["app.t.1.r0"]), 100)
            .unwrap();

        assert_eq!(
            proxy.declared_agent_roles(),
            vec!["a.proc.agent.0".to_string(), "a.proc.agent.1".to_string()]
        );
        let info = maintainer.schedule_info();
        assert_eq!(info.updated_at, 100);
        assert_eq!(info.groups[0].global_id.as_deref(), Some("a"));
        assert_eq!(info.groups[0].groups[0].dynamic_placed, 1);
    }

    #[test]
    fn flexible_update_resizes_group() {
        let mut config = test_config(vec![global_group("a", 2)]);
        config.flexible_scale_config.push(FlexibleScaleConfig {
            global_id: "a".to_string(),
            group_id: "proc".to_string(),
            min_node_count: 2,
            max_node_count: 10,
            reserved_idle_node_count: 1,
            reduce_capacity_interval: 3600,
        });
        let mut maintainer = make_maintainer(config);
        let proxy = make_proxy();
        maintainer
            .plan_for(&proxy, &make_roles(&["app.t.1.r0", "app.t.1.r1"]), 100)
            .unwrap();

        let updates = maintainer.run_flexible_updates(100).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!((updates[0].from, updates[0].to), (2, 3));
        assert_eq!(maintainer.groups()[0].plan_maker().prototypes().len(), 3);
        assert_eq!(maintainer.config().find_group("a", "proc").map(|g| g.node_count), Some(3));
        assert_eq!(maintainer.config().flexible_update_log.get("a.proc"), Some(&100));
    }

    #[test]
    fn unknown_flexible_target_rejected() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 2)]));
        let update = FlexibleUpdate {
            global_id: "zzz".to_string(),
            group_id: "proc".to_string(),
            from: 2,
            to: 3,
        };
        assert!(matches!(
            maintainer.apply_flexible_update(&update, 1),
            Err(MaintainerError::UnknownFlexibleTarget(_))
        ));
    }

    #[test]
    fn invalid_reload_keeps_old_config() {
        let mut maintainer = make_maintainer(test_config(vec![global_group("a", 2)]));
        let bad = test_config(vec![global_group("b", 1), global_group("b", 1)]);
        assert!(maintainer.update_config(bad).is_err());
        assert_eq!(maintainer.groups()[0].global_id(), "a");

        let good = test_config(vec![global_group("c", 1)]);
        maintainer.update_config(good).unwrap();
        assert_eq!(maintainer.groups()[0].global_id(), "c");
    }

    #[test]
    fn active_build_ids_collects_jobs() {
        let mut roles = make_roles(&["app.t.1.r0"]);
        roles.insert(
            "app.t.2.r0".to_string(),
            TargetRole::new("app.t.2.r0", BuildId::new("app", "t", 2)),
        );
        let ids = active_build_ids(&roles);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&BuildId::new("app", "t", 2)));
    }
}
