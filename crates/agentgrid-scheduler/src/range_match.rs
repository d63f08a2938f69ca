//! Static range matching of target roles to agent nodes.

use agentgrid_core::{AgentGroupConfig, PartitionRange, RANGE_FROM, RANGE_TO, split_range};

/// Partition ranges of every node, per group index.
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    groups: Vec<Vec<PartitionRange>>,
}

impl RangeTable {
    pub fn new(config: &AgentGroupConfig) -> Self {
        Self {
            groups: config
                .agent_node_groups
                .iter()
                .map(|g| split_range(RANGE_FROM, RANGE_TO, g.node_count))
                .collect(),
        }
    }

    pub fn ranges(&self, group_index: usize) -> &[PartitionRange] {
        self.groups
            .get(group_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Node index within `group_index` that serves `range`.
    pub fn match_node(&self, group_index: usize, role_name: &str, range: &PartitionRange) -> Option<usize> {
        match_static_node(self.ranges(group_index), role_name, range)
    }
}

/// Pick the node whose range overlaps `range` the most.
///
/// Ties resolve to `ties[role_name.len() % ties.len()]`, so the same input
/// always lands on the same node. `None` when nothing overlaps.
pub fn match_static_node(ranges: &[PartitionRange], role_name: &str, range: &PartitionRange) -> Option<usize> {
    let best = ranges.iter().map(|r| r.overlap(range)).max()?;
    if best == 0 {
        return None;
    }
    let ties: Vec<usize> = ranges
        .iter()
        .enumerate()
        .filter(|(_, r)| r.overlap(range) == best)
        .map(|(i, _)| i)
        .collect();
    Some(ties[role_name.len() % ties.len()])
}
