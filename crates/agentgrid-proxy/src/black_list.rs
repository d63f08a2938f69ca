//! Per-target-role agent blacklist.
//!
//! An entry says "do not place target role T on agent A (slot S)". It
//! lasts until its own timeout elapses or until A is observed on a different
//! slot (or none), which means S was reclaimed and the failure history no
//! longer applies.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlackListEntry {
    pub agent_role: String,
    pub slot_address: String,
    pub timestamp: u64,
    /// Seconds after `timestamp` the entry expires.
    pub timeout: u64,
    pub is_reclaiming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BlackList {
    /// target role → blacklisted agents.
    entries: BTreeMap<String, Vec<BlackListEntry>>,
    /// agent role → last time it was blacklisted for any target role.
    agent_timestamps: BTreeMap<String, u64>,
}

impl BlackList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `target_role` failed on `agent_role`.
    ///
    /// Returns how many distinct target roles now blacklist the agent.
    pub fn add(&mut self, target_role: &str, agent_role: &str, slot_address: &str, now: u64, timeout: u64) -> usize {
        let reclaiming = self.is_reclaiming(agent_role);
        let list = self.entries.entry(target_role.to_string()).or_default();
        match list.iter_mut().find(|e| e.agent_role == agent_role) {
            Some(entry) => {
                entry.slot_address = slot_address.to_string();
                entry.timestamp = now;
                entry.timeout = timeout;
            }
            None => list.push(BlackListEntry {
                agent_role: agent_role.to_string(),
                slot_address: slot_address.to_string(),
                timestamp: now,
                timeout,
                is_reclaiming: reclaiming,
            }),
        }
        self.agent_timestamps.insert(agent_role.to_string(), now);
        self.targets_blacklisting(agent_role)
    }

    pub fn contains(&self, target_role: &str, agent_role: &str) -> bool {
        self.entries
            .get(target_role)
            .is_some_and(|list| list.iter().any(|e| e.agent_role == agent_role))
    }

    pub fn agent_roles(&self, target_role: &str) -> BTreeSet<String> {
        self.entries
            .get(target_role)
            .map(|list| list.iter().map(|e| e.agent_role.clone()).collect())
            .unwrap_or_default()
    }

    pub fn entries(&self, target_role: &str) -> &[BlackListEntry] {
        self.entries
            .get(target_role)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn agent_timestamp(&self, agent_role: &str) -> Option<u64> {
        self.agent_timestamps.get(agent_role).copied()
    }

    /// Number of distinct target roles blacklisting `agent_role`.
    pub fn targets_blacklisting(&self, agent_role: &str) -> usize {
        self.entries
            .values()
            .filter(|list| list.iter().any(|e| e.agent_role == agent_role))
            .count()
    }

    pub fn is_reclaiming(&self, agent_role: &str) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|e| e.agent_role == agent_role && e.is_reclaiming)
    }

    pub fn mark_reclaiming(&mut self, agent_role: &str) {
        for entry in self.entries.values_mut().flatten() {
            if entry.agent_role == agent_role {
                entry.is_reclaiming = true;
            }
        }
    }

    /// Drop entries past their timeout or whose agent is no longer on the
    /// blacklisted slot. Returns the number dropped.
    pub fn expire<F>(&mut self, now: u64, current_address: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut dropped = 0;
        for list in self.entries.values_mut() {
            let before = list.len();
            list.retain(|e| {
                now.saturating_sub(e.timestamp) < e.timeout
                    && current_address(&e.agent_role).as_deref() == Some(e.slot_address.as_str())
            });
            dropped += before - list.len();
        }
        self.entries.retain(|_, list| !list.is_empty());
        dropped
    }

    /// Forget everything about an agent role.
    pub fn remove_agent(&mut self, agent_role: &str) {
        for list in self.entries.values_mut() {
            list.retain(|e| e.agent_role != agent_role);
        }
        self.entries.retain(|_, list| !list.is_empty());
        self.agent_timestamps.remove(agent_role);
    }

    pub fn remove_target(&mut self, target_role: &str) {
        self.entries.remove(target_role);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_query() {
        let mut list = BlackList::new();
        assert_eq!(list.add("r1", "a0", "10.0.0.1:1", 100, 600), 1);
        assert_eq!(list.add("r2", "a0", "10.0.0.1:1", 105, 600), 2);
        assert_eq!(list.add("r1", "a1", "10.0.0.2:1", 110, 600), 1);

        assert!(list.contains("r1", "a0"));
        assert!(!list.contains("r2", "a1"));
        assert_eq!(
            list.agent_roles("r1"),
            ["a0".to_string(), "a1".to_string()].into_iter().collect()
        );
        assert_eq!(list.agent_timestamp("a0"), Some(105));
        assert_eq!(list.agent_timestamp("a9"), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn re_adding_refreshes_timestamp() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s", 100, 600);
        assert_eq!(list.add("r1", "a0", "s", 200, 600), 1);
        assert_eq!(list.entries("r1")[0].timestamp, 200);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn expire_by_timeout() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s0", 100, 60);
        list.add("r2", "a0", "s0", 150, 60);
        let same_slot = |_: &str| Some("s0".to_string());

        assert_eq!(list.expire(159, same_slot), 0);
        assert_eq!(list.expire(160, same_slot), 1);
        assert!(!list.contains("r1", "a0"));
        assert!(list.contains("r2", "a0"));
    }

    #[test]
    fn entries_expire_on_their_own_timeout() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s0", 100, 60);
        list.add("r1", "a1", "s1", 100, 600);

        list.expire(200, |agent| Some(if agent == "a0" { "s0" } else { "s1" }.to_string()));
        assert_eq!(list.agent_roles("r1"), ["a1".to_string()].into_iter().collect());
        assert_eq!(list.entries("r1")[0].timeout, 600);
    }

    #[test]
    fn expire_when_slot_reclaimed() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s0", 100, 600);
        list.add("r1", "a1", "s1", 100, 600);

        let dropped = list.expire(101, |agent| match agent {
            "a0" => Some("s-new".to_string()),
            "a1" => Some("s1".to_string()),
            _ => None,
        });
        assert_eq!(dropped, 1);
        assert_eq!(list.agent_roles("r1"), ["a1".to_string()].into_iter().collect());

        list.expire(102, |_| None);
        assert!(list.is_empty());
    }

    #[test]
    fn reclaiming_flag_spreads_to_new_entries() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s0", 1, 600);
        list.mark_reclaiming("a0");
        list.add("r2", "a0", "s0", 2, 600);
        assert!(list.entries("r2")[0].is_reclaiming);
        assert!(list.is_reclaiming("a0"));
    }

    #[test]
    fn remove_agent_clears_everything() {
        let mut list = BlackList::new();
        list.add("r1", "a0", "s0", 1, 600);
        list.add("r1", "a1", "s1", 1, 600);
        list.remove_agent("a0");
        assert!(!list.contains("r1", "a0"));
        assert_eq!(list.agent_timestamp("a0"), None);
        assert_eq!(list.len(), 1);
    }
}
