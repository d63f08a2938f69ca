//! Greedy candidate ordering.

use std::cmp::{Ordering, Reverse};

use agentgrid_core::AgentRoleInfo;

/// Heap entry for one agent node; the greatest entry is tried first.
///
/// Field order is the ranking order: allocated in history, service ready,
/// oldest blacklist timestamp, lightest load, lowest node index, smallest
/// agent role name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPriority {
    pub name: String,
    pub allocated: bool,
    pub ready: bool,
    /// Last blacklist time; `0` when never blacklisted.
    pub black_list_ts: u64,
    pub load: usize,
    pub node_index: u32,
}

impl AgentPriority {
    pub fn new(agent: &AgentRoleInfo, allocated: bool, ready: bool, black_list_ts: u64) -> Self {
        Self {
            name: agent.name.clone(),
            allocated,
            ready,
            black_list_ts,
            load: agent.target_roles.len(),
            node_index: agent.node_index,
        }
    }

    #[allow(clippy::type_complexity)]
    fn key(&self) -> (bool, bool, Reverse<u64>, Reverse<usize>, Reverse<u32>, Reverse<&str>) {
        (
            self.allocated,
            self.ready,
            Reverse(self.black_list_ts),
            Reverse(self.load),
            Reverse(self.node_index),
            Reverse(self.name.as_str()),
        )
    }
}

impl Ord for AgentPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for AgentPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(name: &str, allocated: bool, ready: bool, ts: u64, load: usize, node_index: u32) -> AgentPriority {
        AgentPriority {
            name: name.to_string(),
            allocated,
            ready,
            black_list_ts: ts,
            load,
            node_index,
        }
    }

    fn pop_order(entries: Vec<AgentPriority>) -> Vec<String> {
        let mut heap: BinaryHeap<_> = entries.into_iter().collect();
        std::iter::from_fn(|| heap.pop()).map(|e| e.name).collect()
    }

    #[test]
    fn allocated_beats_everything_below() {
        let order = pop_order(vec![
            entry("fresh", false, true, 0, 0, 0),
            entry("used", true, false, 900, 5, 9),
        ]);
        assert_eq!(order, vec!["used", "fresh"]);
    }

    #[test]
    fn ready_then_older_blacklist() {
        let order = pop_order(vec![
            entry("not-ready", true, false, 0, 0, 0),
            entry("recent", true, true, 500, 0, 1),
            entry("old", true, true, 100, 0, 2),
        ]);
        assert_eq!(order, vec!["old", "recent", "not-ready"]);
    }

    #[test]
    fn lighter_load_then_lower_index_then_name() {
        let order = pop_order(vec![
            entry("b", true, true, 0, 1, 0),
            entry("c", true, true, 0, 0, 3),
            entry("a2", true, true, 0, 0, 1),
            entry("a1", true, true, 0, 0, 1),
        ]);
        assert_eq!(order, vec!["a1", "a2", "c", "b"]);
    }
}
