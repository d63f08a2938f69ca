//! agentgrid-proxy — the plan maker's window onto live agent state.
//!
//! The plan maker never talks to the slot scheduler directly. It asks an
//! `AgentSchedulerProxy` for per-agent identifiers, readiness and
//! blacklists, and declares or retires agent nodes through it.
//!
//! # Architecture
//!
//! ```text
//! AgentRolePlanMaker
//!   └── AgentSchedulerProxy (trait)
//!         └── SlotSchedulerProxy<S>
//!               ├── identifier / readiness cache   (refreshed periodically)
//!               ├── blacklist: targetRole → [agentRole, slot, ts, reclaiming]
//!               └── S: SlotScheduler (enumerate / release slots, set role plan)
//! ```
//!
//! Accessors are synchronous and non-blocking; the cache is rebuilt by
//! `SlotSchedulerProxy::refresh`, driven by `spawn_refresh_loop`.

pub mod black_list;
pub mod proxy;
pub mod refresh;
pub mod slot;
pub mod slot_proxy;

pub use black_list::{BlackList, BlackListEntry};
pub use proxy::{AgentIdentifier, AgentSchedulerProxy};
pub use refresh::spawn_refresh_loop;
pub use slot::{InMemorySlotScheduler, SlotInfo, SlotInventory, SlotScheduler};
pub use slot_proxy::{ProxyConfig, SlotSchedulerProxy};
