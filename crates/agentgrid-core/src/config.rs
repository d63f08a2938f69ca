//! Agent group and global agent config (JSON).
//!
//! A job-local config is `{"agent_node_groups": [...]}`. The global
//! config wraps several of those behind a `global_id` and a package list,
//! and adds flexible scaling targets plus the update log that records
//! when each target last changed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::AgentNodePlan;

/// Default blacklist / cooldown window in seconds.
pub const DEFAULT_IN_BLACK_LIST_TIMEOUT: u64 = 600;

fn default_in_black_list_timeout() -> u64 {
    DEFAULT_IN_BLACK_LIST_TIMEOUT
}

/// Oversell limit on one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub resource_name: String,
    pub oversell_factor: f64,
}

/// One configured class of agent nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGroup {
    pub identifier: String,
    /// Full-match regex over target role names.
    pub role_pattern: String,
    pub node_count: u32,
    #[serde(default)]
    pub dynamic_role_mapping: bool,
    /// Exclusive agents host at most one target role.
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub resource_limits: Vec<ResourceLimit>,
    /// Seconds a blacklist entry or a failed-schedule cooldown lasts.
    #[serde(default = "default_in_black_list_timeout")]
    pub in_black_list_timeout: u64,
    #[serde(default)]
    pub lazy_allocate: bool,
    #[serde(default)]
    pub flexible_idle_agent_count: u32,
    #[serde(default)]
    pub agent_node_plan: AgentNodePlan,
}

impl AgentGroup {
    pub fn new(identifier: &str, role_pattern: &str, node_count: u32) -> Self {
        Self {
            identifier: identifier.to_string(),
            role_pattern: role_pattern.to_string(),
            node_count,
            dynamic_role_mapping: false,
            exclusive: false,
            resource_limits: Vec::new(),
            in_black_list_timeout: DEFAULT_IN_BLACK_LIST_TIMEOUT,
            lazy_allocate: false,
            flexible_idle_agent_count: 0,
            agent_node_plan: AgentNodePlan::default(),
        }
    }

    pub fn with_resource_limit(mut self, resource: &str, oversell_factor: f64) -> Self {
        self.resource_limits.push(ResourceLimit {
            resource_name: resource.to_string(),
            oversell_factor,
        });
        self
    }

    pub fn with_node_resource(mut self, resource: &str, amount: i64) -> Self {
        self.agent_node_plan
            .resources
            .insert(resource.to_string(), amount);
        self
    }

    fn check(&self, index: usize) -> ConfigResult<()> {
        if self.identifier.is_empty() {
            return Err(ConfigError::EmptyIdentifier { index });
        }
        if self.role_pattern.is_empty() {
            return Err(ConfigError::EmptyRolePattern {
                identifier: self.identifier.clone(),
            });
        }
        if self.node_count == 0 {
            return Err(ConfigError::ZeroNodeCount {
                identifier: self.identifier.clone(),
            });
        }
        if let Some(limit) = self
            .resource_limits
            .iter()
            .find(|l| l.oversell_factor.is_nan() || l.oversell_factor <= 0.0)
        {
            return Err(ConfigError::InvalidOversellFactor {
                identifier: self.identifier.clone(),
                resource: limit.resource_name.clone(),
            });
        }
        Ok(())
    }
}

/// Ordered list of agent groups; first matching pattern wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentGroupConfig {
    #[serde(default)]
    pub agent_node_groups: Vec<AgentGroup>,
}

impl AgentGroupConfig {
    pub fn new(groups: Vec<AgentGroup>) -> Self {
        Self {
            agent_node_groups: groups,
        }
    }

    /// Validate every entry. Pattern syntax is checked when a
    /// `GroupMatcher` is built from the config.
    pub fn check(&self) -> ConfigResult<()> {
        let mut seen = BTreeSet::new();
        for (index, group) in self.agent_node_groups.iter().enumerate() {
            group.check(index)?;
            if !seen.insert(group.identifier.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.identifier.clone()));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.check().is_ok()
    }

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: AgentGroupConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        debug!(?path, groups = config.agent_node_groups.len(), "agent group config loaded");
        Ok(config)
    }

    pub fn group(&self, identifier: &str) -> Option<&AgentGroup> {
        self.agent_node_groups
            .iter()
            .find(|g| g.identifier == identifier)
    }

    pub fn is_dynamic(&self) -> bool {
        self.agent_node_groups.iter().any(|g| g.dynamic_role_mapping)
    }
}

/// A pool of agents shared by every job whose packages match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalGroupConfig {
    pub global_id: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(flatten)]
    pub groups: AgentGroupConfig,
}

/// Elastic node-count policy for one `{global_id}.{group_id}` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexibleScaleConfig {
    pub global_id: String,
    pub group_id: String,
    pub min_node_count: u32,
    pub max_node_count: u32,
    #[serde(default)]
    pub reserved_idle_node_count: u32,
    /// Minimum seconds between a recorded update and the next scale-down.
    #[serde(default)]
    pub reduce_capacity_interval: u64,
}

impl FlexibleScaleConfig {
    /// Key used in `flexible_update_log`.
    pub fn target_key(&self) -> String {
        format!("{}.{}", self.global_id, self.group_id)
    }
}

/// Top-level config of the global agent maintainer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalAgentConfig {
    #[serde(default)]
    pub global_agent_groups: Vec<GlobalGroupConfig>,
    #[serde(default)]
    pub flexible_scale_config: Vec<FlexibleScaleConfig>,
    /// `"{globalId}.{groupId}" → last update epoch seconds`.
    #[serde(default)]
    pub flexible_update_log: BTreeMap<String, u64>,
    /// Keys this version does not know, kept so a store does not drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GlobalAgentConfig {
    pub fn check(&self) -> ConfigResult<()> {
        let mut seen = BTreeSet::new();
        for global in &self.global_agent_groups {
            if global.global_id.is_empty() {
                return Err(ConfigError::EmptyGlobalId);
            }
            if !seen.insert(global.global_id.as_str()) {
                return Err(ConfigError::DuplicateGlobalGroup(global.global_id.clone()));
            }
            global.groups.check()?;
        }

        for flex in &self.flexible_scale_config {
            let group = self
                .find_group(&flex.global_id, &flex.group_id)
                .ok_or_else(|| ConfigError::FlexibleTargetNotFound {
                    global_id: flex.global_id.clone(),
                    group_id: flex.group_id.clone(),
                })?;
            if group.flexible_idle_agent_count > 0 {
                return Err(ConfigError::FlexibleIdleConflict {
                    global_id: flex.global_id.clone(),
                    group_id: flex.group_id.clone(),
                });
            }
            let reason = if flex.min_node_count > flex.max_node_count {
                Some("min_node_count exceeds max_node_count")
            } else if flex.max_node_count == 0 {
                Some("max_node_count is 0")
            } else if flex.reserved_idle_node_count > flex.max_node_count {
                Some("reserved_idle_node_count exceeds max_node_count")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidNodeRange {
                    global_id: flex.global_id.clone(),
                    group_id: flex.group_id.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn find_group(&self, global_id: &str, group_id: &str) -> Option<&AgentGroup> {
        self.global_agent_groups
            .iter()
            .find(|g| g.global_id == global_id)
            .and_then(|g| g.groups.group(group_id))
    }

    pub fn find_group_mut(&mut self, global_id: &str, group_id: &str) -> Option<&mut AgentGroup> {
        self.global_agent_groups
            .iter_mut()
            .find(|g| g.global_id == global_id)
            .and_then(|g| {
                g.groups
                    .agent_node_groups
                    .iter_mut()
                    .find(|group| group.identifier == group_id)
            })
    }

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: GlobalAgentConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        debug!(?path, groups = config.global_agent_groups.len(), "global agent config loaded");
        Ok(config)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to_file(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, self.to_json_string()?)?;
        debug!(?path, "global agent config stored");
        Ok(())
    }
}
