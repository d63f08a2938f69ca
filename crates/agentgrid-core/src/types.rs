//! Domain types for the agent-node scheduler.
//!
//! These describe target roles (worker processes a build job needs),
//! agent nodes (shared execution slots that host them), and the durable
//! target-role → agent-role assignment that survives restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Globally unique name of a target role.
pub type RoleName = String;

/// Desired target roles for one tick, keyed by role name.
pub type TargetRolePlan = BTreeMap<RoleName, TargetRole>;

/// Lower bound of the partition range domain.
pub const RANGE_FROM: u32 = 0;

/// Upper bound (inclusive) of the partition range domain.
pub const RANGE_TO: u32 = 65535;

// ── Build identity ─────────────────────────────────────────────────

/// Identifies the build job a target role belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildId {
    pub app_name: String,
    pub data_table: String,
    pub generation_id: u32,
}

impl BuildId {
    pub fn new(app_name: &str, data_table: &str, generation_id: u32) -> Self {
        Self {
            app_name: app_name.to_string(),
            data_table: data_table.to_string(),
            generation_id,
        }
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.app_name, self.data_table, self.generation_id)
    }
}

// ── Partition ranges ───────────────────────────────────────────────

/// An inclusive `[from, to]` slice of the partition domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub from: u32,
    pub to: u32,
}

impl PartitionRange {
    /// The whole `[RANGE_FROM, RANGE_TO]` domain.
    pub const FULL: PartitionRange = PartitionRange {
        from: RANGE_FROM,
        to: RANGE_TO,
    };

    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Number of partition slots shared by both ranges.
    pub fn overlap(&self, other: &PartitionRange) -> u32 {
        let lo = self.from.max(other.from);
        let hi = self.to.min(other.to);
        if hi < lo { 0 } else { hi - lo + 1 }
    }

    /// Parse the range embedded in a role name.
    ///
    /// Role names are dot-separated; the last segment shaped like
    /// `{from}_{to}` with `from <= to <= RANGE_TO` wins.
    pub fn from_role_name(role_name: &str) -> Option<Self> {
        role_name.rsplit('.').find_map(|segment| {
            let (from, to) = segment.split_once('_')?;
            let from: u32 = from.parse().ok()?;
            let to: u32 = to.parse().ok()?;
            (from <= to && to <= RANGE_TO).then_some(Self { from, to })
        })
    }
}

/// Split `[from, to]` into `parts` contiguous ranges.
///
/// Leading ranges absorb the remainder, so lengths differ by at most one.
/// Parts that would be empty are not produced.
pub fn split_range(from: u32, to: u32, parts: u32) -> Vec<PartitionRange> {
    if parts == 0 || from > to {
        return Vec::new();
    }
    let count = u64::from(to - from) + 1;
    let each = count / u64::from(parts);
    let remainder = count % u64::from(parts);

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = u64::from(from);
    for i in 0..u64::from(parts) {
        let len = each + u64::from(i < remainder);
        if len == 0 {
            break;
        }
        let end = start + len - 1;
        ranges.push(PartitionRange::new(start as u32, end as u32));
        start = end + 1;
    }
    ranges
}

// ── Target roles ───────────────────────────────────────────────────

/// A logical worker process one build job needs running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRole {
    pub name: RoleName,
    pub build_id: BuildId,
    /// Explicit partition range; parsed from `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<PartitionRange>,
    /// Requested amount per named resource (e.g. `cpu`, `mem`).
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
    /// Worker package URIs, used to route the role to a global group.
    #[serde(default)]
    pub packages: Vec<String>,
}

impl TargetRole {
    pub fn new(name: &str, build_id: BuildId) -> Self {
        Self {
            name: name.to_string(),
            build_id,
            range: None,
            resources: BTreeMap::new(),
            packages: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: &str, amount: i64) -> Self {
        self.resources.insert(resource.to_string(), amount);
        self
    }

    pub fn with_packages(mut self, packages: &[&str]) -> Self {
        self.packages = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    /// The partition range this role covers.
    pub fn partition_range(&self) -> PartitionRange {
        self.range
            .or_else(|| PartitionRange::from_role_name(&self.name))
            .unwrap_or(PartitionRange::FULL)
    }

    /// Requested amount of `resource`. Zero when not requested; negative
    /// requests count as zero.
    pub fn resource(&self, resource: &str) -> i64 {
        self.resources.get(resource).copied().unwrap_or(0).max(0)
    }

    pub fn package_signature(&self) -> Option<String> {
        package_signature(&self.packages)
    }
}

/// Hex SHA-256 over the sorted, de-duplicated package URIs.
///
/// `None` for an empty package list.
pub fn package_signature(packages: &[String]) -> Option<String> {
    let unique: BTreeSet<&str> = packages.iter().map(String::as_str).collect();
    if unique.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for package in unique {
        hasher.update(package.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex::encode(hasher.finalize()))
}

// ── Agent nodes ────────────────────────────────────────────────────

/// Placement request for one agent node, handed to the slot scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentNodePlan {
    /// Resource amounts the node advertises.
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Build job that owns the node; `None` for global (shared) agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<BuildId>,
    /// Seconds a target-role blacklist entry against this node lasts.
    /// Filled from the owning group's `in_black_list_timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_list_timeout: Option<u64>,
}

impl AgentNodePlan {
    pub fn resource_amount(&self, resource: &str) -> i64 {
        self.resources.get(resource).copied().unwrap_or(0)
    }
}

/// Name of the agent role for `node_index` of group `identifier`.
pub fn agent_role_name(global_id: Option<&str>, identifier: &str, node_index: u32) -> String {
    match global_id {
        Some(global_id) => format!("{global_id}.{identifier}.agent.{node_index}"),
        None => format!("{identifier}.agent.{node_index}"),
    }
}

/// One agent node instance within a scheduling tick.
///
/// Prototypes are built once per config and cloned fresh every tick;
/// only the resulting `AssignmentMap` outlives the tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRoleInfo {
    pub name: String,
    pub plan: AgentNodePlan,
    pub target_roles: BTreeSet<RoleName>,
    pub group_index: usize,
    pub node_index: u32,
    pub config_path: String,
    pub is_dynamic_mapping: bool,
    pub is_global_agent: bool,
}

impl AgentRoleInfo {
    pub fn is_idle(&self) -> bool {
        self.target_roles.is_empty()
    }

    /// Sum of `resource` requested by the roles currently assigned here.
    pub fn used_resource(&self, resource: &str, plan: &TargetRolePlan) -> i64 {
        self.target_roles
            .iter()
            .filter_map(|name| plan.get(name))
            .map(|role| role.resource(resource))
            .sum()
    }
}

// ── Durable assignment ─────────────────────────────────────────────

/// What one agent role hosts, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssignment {
    /// Live identifier of the agent's slot at the time of the tick.
    pub identifier: String,
    pub target_roles: Vec<RoleName>,
}

/// `agentRoleName → (agentIdentifier, [targetRoleName...])`.
///
/// Keyed in a `BTreeMap` so the serialized form is stable and can be
/// compared between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentMap {
    agents: BTreeMap<String, AgentAssignment>,
}

/// Where a target role lived in a prior assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedPlacement {
    pub agent_role: String,
    pub identifier: String,
}

impl AssignmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent_role: &str, assignment: AgentAssignment) {
        self.agents.insert(agent_role.to_string(), assignment);
    }

    pub fn get(&self, agent_role: &str) -> Option<&AgentAssignment> {
        self.agents.get(agent_role)
    }

    pub fn contains_agent(&self, agent_role: &str) -> bool {
        self.agents.contains_key(agent_role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AgentAssignment)> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Merge `other` in; its entries overwrite on key collision.
    pub fn merge(&mut self, other: AssignmentMap) {
        self.agents.extend(other.agents);
    }

    /// Agent role currently hosting `target_role`, if any.
    pub fn agent_of(&self, target_role: &str) -> Option<&str> {
        self.agents
            .iter()
            .find(|(_, a)| a.target_roles.iter().any(|r| r == target_role))
            .map(|(name, _)| name.as_str())
    }

    /// Invert the map into `targetRole → (agentRole, identifier)`.
    pub fn inherited_placements(&self) -> BTreeMap<RoleName, InheritedPlacement> {
        let mut placements = BTreeMap::new();
        for (agent_role, assignment) in &self.agents {
            for role in &assignment.target_roles {
                placements.insert(
                    role.clone(),
                    InheritedPlacement {
                        agent_role: agent_role.clone(),
                        identifier: assignment.identifier.clone(),
                    },
                );
            }
        }
        placements
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(String, AgentAssignment)> for AssignmentMap {
    fn from_iter<I: IntoIterator<Item = (String, AgentAssignment)>>(iter: I) -> Self {
        Self {
            agents: iter.into_iter().collect(),
        }
    }
}
