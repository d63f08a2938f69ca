//! agentgrid-core — shared types for the agent-node scheduler.
//!
//! Holds the data model every other agentgrid crate speaks:
//!
//! - **`types`** — target roles, partition ranges, agent node plans,
//!   per-tick `AgentRoleInfo` and the durable `AssignmentMap`
//! - **`config`** — agent group / global group / flexible scale config
//!   (JSON), with whole-config validation
//! - **`matcher`** — first-match-wins role → group index lookup, memoized
//! - **`snapshot`** — replace-whole-object publication for readers

pub mod config;
pub mod error;
pub mod matcher;
pub mod snapshot;
pub mod types;

pub use config::{
    AgentGroup, AgentGroupConfig, FlexibleScaleConfig, GlobalAgentConfig, GlobalGroupConfig,
    ResourceLimit,
};
pub use error::{ConfigError, ConfigResult};
pub use matcher::GroupMatcher;
pub use snapshot::Snapshot;
pub use types::*;
