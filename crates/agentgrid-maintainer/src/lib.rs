//! agentgrid-maintainer — pools agent nodes across build jobs.
//!
//! A `GlobalAgentMaintainer` owns one `SingleGlobalAgentGroup` per
//! configured global group. Each tick:
//!
//! 1. job role plans are routed into groups by package signature
//!    (`add_target_role_plan`, round-robin starting group)
//! 2. every group's plan maker schedules its routed roles
//! 3. results are merged, persisted when changed, and published
//! 4. agent nodes are declared / retired through the proxy
//!
//! Roles no global group accepts can be scheduled on job-local agents by a
//! `JobAgentMaintainer`: one plan maker per build, persisted under the
//! build's scope, with nodes of inactive builds retired each tick.
//!
//! Flexible scaling proposals come from the last tick's group loads and
//! are applied by resizing the group and recording the update time.

pub mod error;
pub mod group;
pub mod job;
pub mod maintainer;
mod persist;

pub use error::{MaintainerError, MaintainerResult};
pub use group::SingleGlobalAgentGroup;
pub use job::{JobAgentGroup, JobAgentMaintainer};
pub use maintainer::{GLOBAL_SCOPE, GlobalAgentMaintainer, GlobalPlan, ScheduleInfo, active_build_ids};
