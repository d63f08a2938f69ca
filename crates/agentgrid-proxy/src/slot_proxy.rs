//! `AgentSchedulerProxy` over a `SlotScheduler`.
//!
//! Keeps three pieces of state behind reader/writer locks: the declared
//! agent role plan, an identifier/readiness cache rebuilt by `refresh`,
//! and the target-role blacklist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use agentgrid_core::{AgentNodePlan, BuildId};
use agentgrid_core::config::DEFAULT_IN_BLACK_LIST_TIMEOUT;

use crate::black_list::BlackList;
use crate::proxy::{AgentIdentifier, AgentSchedulerProxy};
use crate::slot::{SlotInfo, SlotScheduler};

/// Tuning for `SlotSchedulerProxy`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Seconds a blacklist entry lasts when the agent's declared plan
    /// carries no timeout of its own.
    pub black_list_timeout: u64,
    /// Distinct target roles blacklisting one agent before its slot is
    /// released.
    pub reclaim_threshold: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            black_list_timeout: DEFAULT_IN_BLACK_LIST_TIMEOUT,
            reclaim_threshold: 3,
        }
    }
}

/// Cached view of one declared agent role.
#[derive(Debug, Clone, Default)]
struct AgentState {
    identifier: String,
    synced: bool,
    ready: bool,
    slot_address: Option<String>,
}

impl AgentState {
    fn observe(previous: Option<&AgentState>, slot: Option<&SlotInfo>) -> Self {
        match slot {
            Some(slot) if !slot.reclaiming && !slot.identifier.is_empty() => Self {
                identifier: slot.identifier.clone(),
                synced: true,
                ready: slot.service_ready,
                slot_address: Some(slot.address.clone()),
            },
            // Placed, but the process has not registered yet.
            Some(slot) if !slot.reclaiming => Self {
                identifier: previous.map(|p| p.identifier.clone()).unwrap_or_default(),
                synced: false,
                ready: false,
                slot_address: Some(slot.address.clone()),
            },
            _ => Self {
                identifier: String::new(),
                synced: true,
                ready: false,
                slot_address: None,
            },
        }
    }
}

pub struct SlotSchedulerProxy<S> {
    slots: Arc<S>,
    config: ProxyConfig,
    declared: RwLock<BTreeMap<String, AgentNodePlan>>,
    agents: RwLock<BTreeMap<String, AgentState>>,
    black_list: RwLock<BlackList>,
}

impl<S: SlotScheduler> SlotSchedulerProxy<S> {
    pub fn new(slots: Arc<S>) -> Self {
        Self::with_config(slots, ProxyConfig::default())
    }

    pub fn with_config(slots: Arc<S>, config: ProxyConfig) -> Self {
        Self {
            slots,
            config,
            declared: RwLock::new(BTreeMap::new()),
            agents: RwLock::new(BTreeMap::new()),
            black_list: RwLock::new(BlackList::new()),
        }
    }

    pub fn slot_scheduler(&self) -> &Arc<S> {
        &self.slots
    }

    pub fn declared_agent_roles(&self) -> Vec<String> {
        let declared = self.declared.read().unwrap_or_else(|e| e.into_inner());
        declared.keys().cloned().collect()
    }

    /// Copy of the blacklist, for introspection.
    pub fn black_list(&self) -> BlackList {
        self.black_list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn refresh(&self) {
        self.refresh_at(epoch_secs());
    }

    /// Rebuild the identifier cache from the slot scheduler and expire
    /// stale blacklist entries.
    pub fn refresh_at(&self, now: u64) {
        let roles = self.declared_agent_roles();
        let next: BTreeMap<String, AgentState> = {
            let previous = self.agents.read().unwrap_or_else(|e| e.into_inner());
            roles
                .into_iter()
                .map(|role| {
                    let slots = self.slots.slots(&role);
                    let state = AgentState::observe(previous.get(&role), slots.first());
                    (role, state)
                })
                .collect()
        };

        let dropped = {
            let mut black_list = self.black_list.write().unwrap_or_else(|e| e.into_inner());
            black_list.expire(now, |agent| {
                next.get(agent).and_then(|s| s.slot_address.clone())
            })
        };

        let pending = next.values().filter(|s| !s.synced).count();
        *self.agents.write().unwrap_or_else(|e| e.into_inner()) = next;
        debug!(pending, expired = dropped, "agent proxy refreshed");
    }

    pub fn add_target_role_to_black_list_at(
        &self,
        target_role: &str,
        observed_slots: &[SlotInfo],
        now: u64,
    ) -> Option<String> {
        let (agent_role, address) = {
            let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
            agents.iter().find_map(|(role, state)| {
                let address = state.slot_address.as_ref()?;
                observed_slots
                    .iter()
                    .any(|s| &s.address == address)
                    .then(|| (role.clone(), address.clone()))
            })?
        };

        let timeout = self.black_list_timeout(&agent_role);
        let reclaim = {
            let mut black_list = self.black_list.write().unwrap_or_else(|e| e.into_inner());
            let count = black_list.add(target_role, &agent_role, &address, now, timeout);
            info!(%target_role, %agent_role, %address, count, timeout, "target role blacklisted on agent");
            let reclaim = count >= self.config.reclaim_threshold && !black_list.is_reclaiming(&agent_role);
            if reclaim {
                black_list.mark_reclaiming(&agent_role);
            }
            reclaim
        };

        if reclaim {
            let victims: Vec<SlotInfo> = self
                .slots
                .slots(&agent_role)
                .into_iter()
                .filter(|s| s.address == address)
                .collect();
            warn!(%agent_role, %address, "agent node blacklisted by too many target roles, releasing slot");
            self.slots.release_slots(&agent_role, &victims);
        }
        Some(agent_role)
    }

    fn black_list_timeout(&self, agent_role: &str) -> u64 {
        let declared = self.declared.read().unwrap_or_else(|e| e.into_inner());
        declared
            .get(agent_role)
            .and_then(|plan| plan.black_list_timeout)
            .unwrap_or(self.config.black_list_timeout)
    }

    fn publish_role_plan(&self, declared: &BTreeMap<String, AgentNodePlan>) {
        self.slots.set_role_plan(declared.clone());
    }

    fn forget_agents(&self, agent_roles: &[String]) {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let mut black_list = self.black_list.write().unwrap_or_else(|e| e.into_inner());
        for role in agent_roles {
            agents.remove(role);
            black_list.remove_agent(role);
        }
    }
}

impl<S: SlotScheduler> AgentSchedulerProxy for SlotSchedulerProxy<S> {
    fn agent_identifier(&self, agent_role: &str) -> AgentIdentifier {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        match agents.get(agent_role) {
            Some(state) => AgentIdentifier {
                synced: state.synced,
                identifier: state.identifier.clone(),
            },
            // Not observed yet.
            None => AgentIdentifier::pending(""),
        }
    }

    fn is_agent_service_ready(&self, agent_role: &str) -> bool {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(agent_role).is_some_and(|s| s.ready)
    }

    fn is_in_black_list(&self, target_role: &str, agent_role: &str) -> bool {
        let black_list = self.black_list.read().unwrap_or_else(|e| e.into_inner());
        black_list.contains(target_role, agent_role)
    }

    fn in_black_list_agent_roles(&self, target_role: &str) -> BTreeSet<String> {
        let black_list = self.black_list.read().unwrap_or_else(|e| e.into_inner());
        black_list.agent_roles(target_role)
    }

    fn agent_node_black_list_timestamp(&self, agent_role: &str) -> Option<u64> {
        let black_list = self.black_list.read().unwrap_or_else(|e| e.into_inner());
        black_list.agent_timestamp(agent_role)
    }

    fn declare_agent_role(&self, agent_role: &str, plan: &AgentNodePlan) -> bool {
        if agent_role.is_empty() {
            return false;
        }
        let mut declared = self.declared.write().unwrap_or_else(|e| e.into_inner());
        if declared.get(agent_role) != Some(plan) {
            declared.insert(agent_role.to_string(), plan.clone());
            self.publish_role_plan(&declared);
            info!(%agent_role, "agent role declared");
        }
        true
    }

    fn remove_agent_role(&self, agent_role: &str) {
        let removed = {
            let mut declared = self.declared.write().unwrap_or_else(|e| e.into_inner());
            let removed = declared.remove(agent_role).is_some();
            if removed {
                self.publish_role_plan(&declared);
            }
            removed
        };
        if removed {
            self.forget_agents(&[agent_role.to_string()]);
            info!(%agent_role, "agent role removed");
        }
    }

    fn remove_useless_agent_nodes(&self, active_build_ids: &BTreeSet<BuildId>) {
        let useless: Vec<String> = {
            let mut declared = self.declared.write().unwrap_or_else(|e| e.into_inner());
            let useless: Vec<String> = declared
                .iter()
                .filter(|(_, plan)| {
                    plan.owner
                        .as_ref()
                        .is_some_and(|owner| !active_build_ids.contains(owner))
                })
                .map(|(role, _)| role.clone())
                .collect();
            if !useless.is_empty() {
                for role in &useless {
                    declared.remove(role);
                }
                self.publish_role_plan(&declared);
            }
            useless
        };
        if !useless.is_empty() {
            self.forget_agents(&useless);
            info!(count = useless.len(), "removed agent nodes of inactive build jobs");
        }
    }

    fn add_target_role_to_black_list(
        &self,
        target_role: &str,
        observed_slots: &[SlotInfo],
    ) -> Option<String> {
        self.add_target_role_to_black_list_at(target_role, observed_slots, epoch_secs())
    }
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
    use crate::slot::InMemorySlotScheduler;

    fn proxy() -> SlotSchedulerProxy<InMemorySlotScheduler> {
        SlotSchedulerProxy::new(Arc::new(InMemorySlotScheduler::new()))
    }

    fn declare(proxy: &SlotSchedulerProxy<InMemorySlotScheduler>, role: &str) {
        assert!(proxy.declare_agent_role(role, &AgentNodePlan::default()));
    }

    #[test]
    fn unobserved_agent_is_pending() {
        let proxy = proxy();
        assert_eq!(proxy.agent_identifier("g.agent.0"), AgentIdentifier::pending(""));
        assert!(!proxy.is_agent_service_ready("g.agent.0"));
    }

    #[test]
    fn refresh_reads_registered_identifier() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        proxy
            .slot_scheduler()
            .place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-1"));
        proxy.refresh_at(100);

        assert_eq!(proxy.agent_identifier("g.agent.0"), AgentIdentifier::synced("id-1"));
        assert!(proxy.is_agent_service_ready("g.agent.0"));
    }

    #[test]
    fn identifier_unsynced_while_propagating() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        let slots = proxy.slot_scheduler();
        slots.place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-1"));
        proxy.refresh_at(100);

        // Restarted on a new slot; the process has not registered yet.
        slots.place("g.agent.0", SlotInfo::new("10.0.0.2:7000"));
        proxy.refresh_at(101);
        assert_eq!(proxy.agent_identifier("g.agent.0"), AgentIdentifier::pending("id-1"));
        assert!(!proxy.is_agent_service_ready("g.agent.0"));

        slots.place("g.agent.0", SlotInfo::ready("10.0.0.2:7000", "id-2"));
        proxy.refresh_at(102);
        assert_eq!(proxy.agent_identifier("g.agent.0"), AgentIdentifier::synced("id-2"));
    }

    #[test]
    fn reclaimed_agent_reports_empty_identifier() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        proxy
            .slot_scheduler()
            .place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-1"));
        proxy.refresh_at(100);
        proxy.slot_scheduler().clear("g.agent.0");
        proxy.refresh_at(101);

        assert_eq!(proxy.agent_identifier("g.agent.0"), AgentIdentifier::synced(""));
    }

    #[test]
    fn declare_publishes_plan_once() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        declare(&proxy, "g.agent.0");
        assert!(!proxy.declare_agent_role("", &AgentNodePlan::default()));
        assert_eq!(proxy.slot_scheduler().role_plan().len(), 1);

        proxy.remove_agent_role("g.agent.0");
        assert!(proxy.slot_scheduler().role_plan().is_empty());
        assert!(proxy.declared_agent_roles().is_empty());
    }

    #[test]
    fn black_list_by_observed_slot() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        declare(&proxy, "g.agent.1");
        let slots = proxy.slot_scheduler();
        slots.place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-0"));
        slots.place("g.agent.1", SlotInfo::ready("10.0.0.2:7000", "id-1"));
        proxy.refresh_at(100);

        let observed = [SlotInfo::new("10.0.0.2:7000")];
        let agent = proxy.add_target_role_to_black_list_at("r1", &observed, 100);
        assert_eq!(agent.as_deref(), Some("g.agent.1"));
        assert!(proxy.is_in_black_list("r1", "g.agent.1"));
        assert!(!proxy.is_in_black_list("r1", "g.agent.0"));
        assert_eq!(proxy.agent_node_black_list_timestamp("g.agent.1"), Some(100));
        assert_eq!(
            proxy.in_black_list_agent_roles("r1"),
            ["g.agent.1".to_string()].into_iter().collect()
        );

        let unknown = [SlotInfo::new("10.9.9.9:1")];
        assert_eq!(proxy.add_target_role_to_black_list_at("r1", &unknown, 100), None);
    }

    #[test]
    fn black_list_expires_after_timeout() {
        let proxy = SlotSchedulerProxy::with_config(
            Arc::new(InMemorySlotScheduler::new()),
            ProxyConfig {
                black_list_timeout: 60,
                reclaim_threshold: 3,
            },
        );
        declare(&proxy, "g.agent.0");
        proxy
            .slot_scheduler()
            .place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-0"));
        proxy.refresh_at(100);
        proxy.add_target_role_to_black_list_at("r1", &[SlotInfo::new("10.0.0.1:7000")], 100);

        proxy.refresh_at(159);
        assert!(proxy.is_in_black_list("r1", "g.agent.0"));
        proxy.refresh_at(160);
        assert!(!proxy.is_in_black_list("r1", "g.agent.0"));
    }

    #[test]
    fn declared_plan_timeout_overrides_default() {
        let proxy = proxy();
        let plan = AgentNodePlan {
            black_list_timeout: Some(60),
            ..AgentNodePlan::default()
        };
        assert!(proxy.declare_agent_role("g.agent.0", &plan));
        declare(&proxy, "g.agent.1");
        let slots = proxy.slot_scheduler();
        slots.place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-0"));
        slots.place("g.agent.1", SlotInfo::ready("10.0.0.2:7000", "id-1"));
        proxy.refresh_at(100);

        proxy.add_target_role_to_black_list_at("r1", &[SlotInfo::new("10.0.0.1:7000")], 100);
        proxy.add_target_role_to_black_list_at("r1", &[SlotInfo::new("10.0.0.2:7000")], 100);

        proxy.refresh_at(200);
        assert!(!proxy.is_in_black_list("r1", "g.agent.0"));
        assert!(proxy.is_in_black_list("r1", "g.agent.1"));
    }

    #[test]
    fn heavily_blacklisted_agent_slot_is_released() {
        let proxy = proxy();
        declare(&proxy, "g.agent.0");
        let slots = proxy.slot_scheduler();
        slots.place("g.agent.0", SlotInfo::ready("10.0.0.1:7000", "id-0"));
        proxy.refresh_at(100);

        let observed = [SlotInfo::new("10.0.0.1:7000")];
        for role in ["r1", "r2", "r3"] {
            proxy.add_target_role_to_black_list_at(role, &observed, 100);
        }
        assert_eq!(
            slots.released(),
            vec![("g.agent.0".to_string(), "10.0.0.1:7000".to_string())]
        );
        assert!(proxy.black_list().entries("r1")[0].is_reclaiming);

        // Slot gone: entries are dropped on the next refresh.
        proxy.refresh_at(101);
        assert!(!proxy.is_in_black_list("r1", "g.agent.0"));
    }

    #[test]
    fn useless_nodes_of_inactive_jobs_removed() {
        let proxy = proxy();
        let active = BuildId::new("app", "t", 1);
        let finished = BuildId::new("app", "t", 0);
        let owned = |owner: &BuildId| AgentNodePlan {
            owner: Some(owner.clone()),
            ..AgentNodePlan::default()
        };
        proxy.declare_agent_role("job1.agent.0", &owned(&active));
        proxy.declare_agent_role("job0.agent.0", &owned(&finished));
        proxy.declare_agent_role("shared.g.agent.0", &AgentNodePlan::default());

        proxy.remove_useless_agent_nodes(&[active].into_iter().collect());

        assert_eq!(
            proxy.declared_agent_roles(),
            vec!["job1.agent.0".to_string(), "shared.g.agent.0".to_string()]
        );
    }
}
