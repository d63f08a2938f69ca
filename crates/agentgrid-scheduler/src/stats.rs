//! Per-tick scheduling counters.

use serde::Serialize;

/// Counters of one agent group for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupScheduleStats {
    pub identifier: String,
    /// Configured node count.
    pub node_count: u32,
    /// Target roles routed to this group.
    pub matched: usize,
    pub static_placed: usize,
    pub inherited: usize,
    pub dynamic_placed: usize,
    pub unassigned: usize,
    /// Unassigned roles skipped because of an active cooldown.
    pub cooling_down: usize,
    /// Agents without target roles after scheduling, before reclamation.
    pub idle: usize,
    /// Idle agents released by the reclamation policy.
    pub released: usize,
    /// Surviving agents with at least one target role.
    pub assigned: usize,
    /// Surviving agents whose service is ready.
    pub ready: usize,
}

impl GroupScheduleStats {
    pub fn placed(&self) -> usize {
        self.static_placed + self.inherited + self.dynamic_placed
    }
}

/// Counters of one plan maker for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    /// Target roles no group pattern matched.
    pub unmatched: usize,
    pub groups: Vec<GroupScheduleStats>,
}

impl ScheduleStats {
    pub fn group(&self, identifier: &str) -> Option<&GroupScheduleStats> {
        self.groups.iter().find(|g| g.identifier == identifier)
    }

    pub fn unassigned(&self) -> usize {
        self.groups.iter().map(|g| g.unassigned).sum()
    }

    pub fn placed(&self) -> usize {
        self.groups.iter().map(GroupScheduleStats::placed).sum()
    }
}
