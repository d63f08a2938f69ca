//! Role name → agent group index matching.

use std::collections::HashMap;

use regex::Regex;

use crate::config::AgentGroupConfig;
use crate::error::{ConfigError, ConfigResult};

/// Compiled role patterns of one `AgentGroupConfig`.
///
/// Patterns are evaluated in declaration order and must match the whole
/// role name. Results are cached per role name; the config is immutable
/// for the matcher's lifetime, so entries never go stale. Owners prune
/// names they no longer schedule with `retain`.
#[derive(Debug, Clone)]
pub struct GroupMatcher {
    patterns: Vec<Regex>,
    cache: HashMap<String, Option<usize>>,
}

impl GroupMatcher {
    pub fn new(config: &AgentGroupConfig) -> ConfigResult<Self> {
        let patterns = config
            .agent_node_groups
            .iter()
            .map(|group| {
                Regex::new(&format!("^(?:{})$", group.role_pattern)).map_err(|source| {
                    ConfigError::InvalidRolePattern {
                        identifier: group.identifier.clone(),
                        source,
                    }
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self {
            patterns,
            cache: HashMap::new(),
        })
    }

    /// Index of the first group whose pattern matches `role_name`.
    pub fn match_role(&mut self, role_name: &str) -> Option<usize> {
        if let Some(cached) = self.cache.get(role_name) {
            return *cached;
        }
        let found = self.patterns.iter().position(|p| p.is_match(role_name));
        self.cache.insert(role_name.to_string(), found);
        found
    }

    /// Uncached lookup, for callers holding only a shared reference.
    pub fn peek(&self, role_name: &str) -> Option<usize> {
        match self.cache.get(role_name) {
            Some(cached) => *cached,
            None => self.patterns.iter().position(|p| p.is_match(role_name)),
        }
    }

    /// Drop cached results for role names `keep` rejects.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        self.cache.retain(|name, _| keep(name));
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
