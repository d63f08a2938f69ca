//! agentgrid-scheduler — maps target roles onto agent nodes, one tick at a time.
//!
//! An `AgentRolePlanMaker` owns one agent group config. Each call to
//! `make_plan` takes the desired target roles and produces:
//!
//! - the surviving agent nodes with their assigned target roles
//! - the durable `AssignmentMap` to persist
//! - `ScheduleStats` counters for introspection and flexible scaling
//!
//! # Architecture
//!
//! ```text
//! AgentRolePlanMaker::make_plan
//!   ├── clone prototypes (one AgentRoleInfo per configured node)
//!   ├── per role: static range match  ─┐
//!   │             history inheritance ─┴─ admission check
//!   ├── greedy heap per group (cooldown, blacklist, admission)
//!   └── idle reclamation → AssignmentMap (identifiers from the proxy)
//! ```

pub mod admission;
pub mod history;
pub mod plan_maker;
pub mod priority;
pub mod range_match;
pub mod stats;
pub mod sync;

pub use admission::admits;
pub use history::AssignmentHistory;
pub use plan_maker::{AgentRolePlanMaker, PlanMakerOptions, PlanOutcome};
pub use priority::AgentPriority;
pub use range_match::{RangeTable, match_static_node};
pub use stats::{GroupScheduleStats, ScheduleStats};
pub use sync::sync_agent_nodes;
