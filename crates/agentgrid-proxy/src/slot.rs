//! Narrow capability interface onto the underlying slot scheduler.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use agentgrid_core::AgentNodePlan;

/// One execution slot the slot scheduler placed for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Placement address of the slot (`host:port`).
    pub address: String,
    /// Identifier reported by the process running in the slot; empty
    /// until the process has registered.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub service_ready: bool,
    /// The slot scheduler is taking this slot back.
    #[serde(default)]
    pub reclaiming: bool,
}

impl SlotInfo {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            identifier: String::new(),
            service_ready: false,
            reclaiming: false,
        }
    }

    /// A slot whose process registered `identifier` and serves requests.
    pub fn ready(address: &str, identifier: &str) -> Self {
        Self {
            address: address.to_string(),
            identifier: identifier.to_string(),
            service_ready: true,
            reclaiming: false,
        }
    }
}

/// What the agent scheduler needs from the slot layer.
pub trait SlotScheduler: Send + Sync {
    fn slots(&self, role: &str) -> Vec<SlotInfo>;

    fn release_slots(&self, role: &str, slots: &[SlotInfo]);

    /// Replace the desired agent role plan.
    fn set_role_plan(&self, plans: BTreeMap<String, AgentNodePlan>);
}

/// Slot placements keyed by role, as loaded from a JSON inventory file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotInventory {
    #[serde(default)]
    pub slots: BTreeMap<String, Vec<SlotInfo>>,
}

impl SlotInventory {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let inventory: SlotInventory = serde_json::from_str(&content)?;
        Ok(inventory)
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    slots: BTreeMap<String, Vec<SlotInfo>>,
    role_plan: BTreeMap<String, AgentNodePlan>,
    released: Vec<(String, String)>,
}

/// Slot scheduler kept entirely in memory.
///
/// Used for dry runs against a recorded inventory and in tests.
#[derive(Debug, Default)]
pub struct InMemorySlotScheduler {
    state: RwLock<InMemoryState>,
}

impl InMemorySlotScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: SlotInventory) -> Self {
        Self {
            state: RwLock::new(InMemoryState {
                slots: inventory.slots,
                ..InMemoryState::default()
            }),
        }
    }

    /// Put `slot` in place of whatever `role` had.
    pub fn place(&self, role: &str, slot: SlotInfo) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.slots.insert(role.to_string(), vec![slot]);
    }

    pub fn clear(&self, role: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.slots.remove(role);
    }

    pub fn role_plan(&self) -> BTreeMap<String, AgentNodePlan> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.role_plan.clone()
    }

    /// `(role, address)` of every slot released so far.
    pub fn released(&self) -> Vec<(String, String)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.released.clone()
    }
}

impl SlotScheduler for InMemorySlotScheduler {
    fn slots(&self, role: &str) -> Vec<SlotInfo> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.slots.get(role).cloned().unwrap_or_default()
    }

    fn release_slots(&self, role: &str, slots: &[SlotInfo]) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = state.slots.get_mut(role) {
            current.retain(|s| !slots.iter().any(|r| r.address == s.address));
        }
        for slot in slots {
            state.released.push((role.to_string(), slot.address.clone()));
        }
        debug!(%role, count = slots.len(), "slots released");
    }

    fn set_role_plan(&self, plans: BTreeMap<String, AgentNodePlan>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        debug!(roles = plans.len(), "role plan updated");
        state.role_plan = plans;
    }
}
