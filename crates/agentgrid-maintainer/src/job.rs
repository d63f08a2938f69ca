//! Job-local agent groups — agent nodes owned by a single build job.
//!
//! Roles that no global group takes are scheduled on agents private to
//! their build. Each build gets its own plan maker whose agents carry the
//! build id as owner, and its assignment is persisted under the build's
//! `{app}.{table}.{gen}` scope. Builds that drop out of the active set have
//! their agent nodes retired through the proxy.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use agentgrid_core::{AgentGroupConfig, AssignmentMap, BuildId, GroupMatcher, Snapshot, TargetRolePlan};
use agentgrid_proxy::AgentSchedulerProxy;
use agentgrid_scheduler::{AgentRolePlanMaker, PlanMakerOptions, sync_agent_nodes};
use agentgrid_state::AssignmentStore;

use crate::error::MaintainerResult;
use crate::maintainer::GlobalPlan;
use crate::persist::PersistedAssignment;

/// Agent nodes and assignment of one build job.
pub struct JobAgentGroup {
    build_id: BuildId,
    plan_maker: AgentRolePlanMaker,
    persisted: PersistedAssignment,
    assignment: Snapshot<AssignmentMap>,
    declared: BTreeSet<String>,
}

impl JobAgentGroup {
    /// Build the job's plan maker and recover its persisted assignment.
    pub fn load(
        build_id: BuildId,
        config: AgentGroupConfig,
        config_path: &str,
        store: Arc<dyn AssignmentStore>,
    ) -> MaintainerResult<Self> {
        let (persisted, recovered) = PersistedAssignment::recover(&build_id.to_string(), store)?;
        let assignment = Snapshot::new(recovered.unwrap_or_default());
        let options = PlanMakerOptions {
            global_id: None,
            config_path: config_path.to_string(),
            owner: Some(build_id.clone()),
        };
        let history = assignment.clone();
        let plan_maker = AgentRolePlanMaker::new(config, options)?.with_history(move || history.load());
        Ok(Self {
            build_id,
            plan_maker,
            persisted,
            assignment,
            declared: BTreeSet::new(),
        })
    }

    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    pub fn plan_maker(&self) -> &AgentRolePlanMaker {
        &self.plan_maker
    }

    pub fn assignment(&self) -> Arc<AssignmentMap> {
        self.assignment.load()
    }

    /// Schedule the job's roles, persist when changed, publish, and sync
    /// agent nodes.
    pub fn make_plan_at(
        &mut self,
        proxy: &dyn AgentSchedulerProxy,
        roles: &TargetRolePlan,
        now: u64,
    ) -> MaintainerResult<GlobalPlan> {
        let outcome = self.plan_maker.make_plan(proxy, roles, now);
        let persisted = self.persisted.write_if_changed(&outcome.assignment)?;
        self.assignment.store(outcome.assignment.clone());
        self.declared = sync_agent_nodes(proxy, &self.declared, &outcome.agent_roles);
        Ok(GlobalPlan {
            agent_roles: outcome.agent_roles,
            assignment: outcome.assignment,
            persisted,
        })
    }
}

/// Job-local groups of every active build, created on first use.
pub struct JobAgentMaintainer {
    config: AgentGroupConfig,
    config_path: Option<PathBuf>,
    store: Arc<dyn AssignmentStore>,
    jobs: BTreeMap<BuildId, JobAgentGroup>,
}

impl JobAgentMaintainer {
    /// Validate `config`, including its role patterns. Job groups are
    /// built from it lazily.
    pub fn new(
        config: AgentGroupConfig,
        config_path: Option<PathBuf>,
        store: Arc<dyn AssignmentStore>,
    ) -> MaintainerResult<Self> {
        config.check()?;
        GroupMatcher::new(&config)?;
        Ok(Self {
            config,
            config_path,
            store,
            jobs: BTreeMap::new(),
        })
    }

    pub fn load_from_file(path: &Path, store: Arc<dyn AssignmentStore>) -> MaintainerResult<Self> {
        let config = AgentGroupConfig::from_file(path)?;
        Self::new(config, Some(path.to_path_buf()), store)
    }

    pub fn job(&self, build_id: &BuildId) -> Option<&JobAgentGroup> {
        self.jobs.get(build_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobAgentGroup> {
        self.jobs.values()
    }

    /// Schedule `roles` on agents of their own build.
    ///
    /// Jobs outside `active` are dropped and the proxy retires every agent
    /// node owned by a build that is neither active nor planned here.
    pub fn make_plan_at(
        &mut self,
        proxy: &dyn AgentSchedulerProxy,
        roles: &TargetRolePlan,
        active: &BTreeSet<BuildId>,
        now: u64,
    ) -> MaintainerResult<BTreeMap<BuildId, GlobalPlan>> {
        let mut by_build: BTreeMap<BuildId, TargetRolePlan> = BTreeMap::new();
        for (name, role) in roles {
            by_build
                .entry(role.build_id.clone())
                .or_default()
                .insert(name.clone(), role.clone());
        }
        for build_id in active {
            if self.jobs.contains_key(build_id) {
                by_build.entry(build_id.clone()).or_default();
            }
        }

        let retired: Vec<BuildId> = self
            .jobs
            .keys()
            .filter(|id| !by_build.contains_key(*id))
            .cloned()
            .collect();
        for build_id in &retired {
            self.jobs.remove(build_id);
            info!(%build_id, "job agent group retired");
        }
        let mut live = active.clone();
        live.extend(by_build.keys().cloned());
        proxy.remove_useless_agent_nodes(&live);

        let path = self
            .config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let mut plans = BTreeMap::new();
        for (build_id, job_roles) in by_build {
            if !self.jobs.contains_key(&build_id) {
                let job = JobAgentGroup::load(build_id.clone(), self.config.clone(), &path, self.store.clone())?;
                debug!(%build_id, "job agent group created");
                self.jobs.insert(build_id.clone(), job);
            }
            if let Some(job) = self.jobs.get_mut(&build_id) {
                let plan = job.make_plan_at(proxy, &job_roles, now)?;
                plans.insert(build_id, plan);
            }
        }
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgrid_core::{AgentGroup, TargetRole};
    use agentgrid_proxy::{InMemorySlotScheduler, SlotSchedulerProxy};
    use agentgrid_state::StateStore;

    fn test_config() -> AgentGroupConfig {
        let mut group = AgentGroup::new("proc", ".*", 2);
        group.dynamic_role_mapping = true;
        AgentGroupConfig::new(vec![group])
    }

    fn make_roles(build_id: &BuildId, names: &[&str]) -> TargetRolePlan {
        names
            .iter()
            .map(|n| (n.to_string(), TargetRole::new(n, build_id.clone())))
            .collect()
    }

    fn make_proxy() -> SlotSchedulerProxy<InMemorySlotScheduler> {
        SlotSchedulerProxy::new(Arc::new(InMemorySlotScheduler::new()))
    }

    #[test]
    fn roles_land_on_agents_of_their_build() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut jobs = JobAgentMaintainer::new(test_config(), None, store.clone()).unwrap();
        let proxy = make_proxy();
        let build = BuildId::new("app", "t", 1);
        let active: BTreeSet<BuildId> = [build.clone()].into_iter().collect();

        let plans = jobs
            .make_plan_at(&proxy, &make_roles(&build, &["app.t.1.r0"]), &active, 100)
            .unwrap();

        let plan = &plans[&build];
        assert!(plan.persisted);
        let agent = plan.assignment.agent_of("app.t.1.r0").unwrap();
        assert!(agent.starts_with("app.t.1.proc.agent."));
        assert_eq!(plan.agent_roles[agent].plan.owner, Some(build.clone()));
        let stored = store.read_assignment("app.t.1").unwrap().unwrap();
        assert_eq!(stored.agent_of("app.t.1.r0"), Some(agent));
    }

    #[test]
    fn unchanged_job_plan_is_not_rewritten() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut jobs = JobAgentMaintainer::new(test_config(), None, store).unwrap();
        let proxy = make_proxy();
        let build = BuildId::new("app", "t", 1);
        let active: BTreeSet<BuildId> = [build.clone()].into_iter().collect();
        let roles = make_roles(&build, &["app.t.1.r0", "app.t.1.r1"]);

        assert!(jobs.make_plan_at(&proxy, &roles, &active, 100).unwrap()[&build].persisted);
        assert!(!jobs.make_plan_at(&proxy, &roles, &active, 110).unwrap()[&build].persisted);
    }

    #[test]
    fn inactive_build_nodes_are_removed() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut jobs = JobAgentMaintainer::new(test_config(), None, store).unwrap();
        let proxy = make_proxy();
        let old = BuildId::new("app", "t", 1);
        let new = BuildId::new("app", "t", 2);

        let active: BTreeSet<BuildId> = [old.clone()].into_iter().collect();
        jobs.make_plan_at(&proxy, &make_roles(&old, &["app.t.1.r0"]), &active, 100)
            .unwrap();
        assert!(proxy
            .declared_agent_roles()
            .iter()
            .any(|r| r.starts_with("app.t.1.")));

        let active: BTreeSet<BuildId> = [new.clone()].into_iter().collect();
        jobs.make_plan_at(&proxy, &make_roles(&new, &["app.t.2.r0"]), &active, 110)
            .unwrap();

        let declared = proxy.declared_agent_roles();
        assert!(declared.iter().all(|r| !r.starts_with("app.t.1.")));
        assert!(declared.iter().any(|r| r.starts_with("app.t.2.")));
        assert!(jobs.job(&old).is_none());
        assert!(jobs.job(&new).is_some());
    }

    #[test]
    fn active_job_without_roles_keeps_its_group() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut jobs = JobAgentMaintainer::new(test_config(), None, store).unwrap();
        let proxy = make_proxy();
        let build = BuildId::new("app", "t", 1);
        let active: BTreeSet<BuildId> = [build.clone()].into_iter().collect();

        jobs.make_plan_at(&proxy, &make_roles(&build, &["app.t.1.r0"]), &active, 100)
            .unwrap();
        let plans = jobs
            .make_plan_at(&proxy, &TargetRolePlan::new(), &active, 110)
            .unwrap();

        assert!(jobs.job(&build).is_some());
        assert!(plans[&build].assignment.agent_of("app.t.1.r0").is_none());
    }

    #[test]
    fn invalid_job_config_rejected() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let config = AgentGroupConfig::new(vec![AgentGroup::new("proc", "(", 1)]);
        assert!(JobAgentMaintainer::new(config, None, store).is_err());
    }
}
