//! Flexible scaler — node-count decisions for global agent groups.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use agentgrid_core::FlexibleScaleConfig;

/// A scaling decision for a single target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Set the node count to the given value.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Observed size of one agent group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupLoad {
    /// Configured node count.
    pub total: u32,
    /// Agents without target roles after scheduling.
    pub idle: u32,
}

/// A node-count change to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlexibleUpdate {
    pub global_id: String,
    pub group_id: String,
    pub from: u32,
    pub to: u32,
}

impl FlexibleUpdate {
    pub fn target_key(&self) -> String {
        format!("{}.{}", self.global_id, self.group_id)
    }
}

/// Decide the node count for one target.
///
/// `last_update` is when the target last changed size; `None` means never,
/// which does not hold back a scale-down.
pub fn evaluate(config: &FlexibleScaleConfig, load: GroupLoad, last_update: Option<u64>, now: u64) -> ScaleDecision {
    let GroupLoad { total, idle } = load;
    let reserved = config.reserved_idle_node_count;

    let target = if total > config.max_node_count {
        config.max_node_count
    } else if total < config.min_node_count {
        config.min_node_count
    } else if idle < reserved {
        total.saturating_add(reserved - idle).min(config.max_node_count)
    } else if idle > reserved && total > config.min_node_count {
        let elapsed = now.saturating_sub(last_update.unwrap_or(0));
        if elapsed < config.reduce_capacity_interval {
            debug!(
                target = %config.target_key(),
                elapsed,
                interval = config.reduce_capacity_interval,
                "scale-down held back"
            );
            return ScaleDecision::NoChange;
        }
        total
            .saturating_sub(idle - reserved)
            .max(config.min_node_count)
    } else {
        total
    };

    if target == total {
        ScaleDecision::NoChange
    } else {
        ScaleDecision::ScaleTo(target)
    }
}

/// Evaluates every configured flexible target.
#[derive(Debug, Clone, Default)]
pub struct FlexibleScaler {
    configs: Vec<FlexibleScaleConfig>,
}

impl FlexibleScaler {
    pub fn new(configs: Vec<FlexibleScaleConfig>) -> Self {
        Self { configs }
    }

    pub fn configs(&self) -> &[FlexibleScaleConfig] {
        &self.configs
    }

    /// Updates for every target whose load is known.
    ///
    /// `loads` and `update_log` are keyed by `{globalId}.{groupId}`.
    pub fn evaluate_all(
        &self,
        loads: &BTreeMap<String, GroupLoad>,
        update_log: &BTreeMap<String, u64>,
        now: u64,
    ) -> Vec<FlexibleUpdate> {
        let mut updates = Vec::new();
        for config in &self.configs {
            let key = config.target_key();
            let Some(load) = loads.get(&key) else {
                debug!(target = %key, "no load observed for flexible target");
                continue;
            };
            if let ScaleDecision::ScaleTo(to) = evaluate(config, *load, update_log.get(&key).copied(), now) {
                debug!(target = %key, from = load.total, to, idle = load.idle, "flexible update proposed");
                updates.push(FlexibleUpdate {
                    global_id: config.global_id.clone(),
                    group_id: config.group_id.clone(),
                    from: load.total,
                    to,
                });
            }
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(min: u32, max: u32, reserved: u32, interval: u64) -> FlexibleScaleConfig {
        FlexibleScaleConfig {
            global_id: "shared".to_string(),
            group_id: "proc".to_string(),
            min_node_count: min,
            max_node_count: max,
            reserved_idle_node_count: reserved,
            reduce_capacity_interval: interval,
        }
    }

    fn load(total: u32, idle: u32) -> GroupLoad {
        GroupLoad { total, idle }
    }

    #[test]
    fn scales_up_to_restore_reserve() {
        let config = test_config(2, 10, 1, 3600);
        assert_eq!(evaluate(&config, load(2, 0), None, 1000), ScaleDecision::ScaleTo(3));
    }

    #[test]
    fn scale_up_capped_at_max() {
        let config = test_config(2, 10, 4, 3600);
        assert_eq!(evaluate(&config, load(9, 0), None, 1000), ScaleDecision::ScaleTo(10));
        assert_eq!(evaluate(&config, load(10, 0), None, 1000), ScaleDecision::NoChange);
    }

    #[test]
    fn out_of_bounds_counts_clamped_immediately() {
        let config = test_config(2, 10, 1, 3600);
        assert_eq!(evaluate(&config, load(12, 12), Some(999), 1000), ScaleDecision::ScaleTo(10));
        assert_eq!(evaluate(&config, load(1, 1), Some(999), 1000), ScaleDecision::ScaleTo(2));
    }

    #[test]
    fn scale_down_waits_for_interval() {
        let config = test_config(2, 10, 1, 3600);
        let last = 10_000;
        assert_eq!(evaluate(&config, load(5, 3), Some(last), last + 10), ScaleDecision::NoChange);
        assert_eq!(evaluate(&config, load(5, 3), Some(last), last + 3599), ScaleDecision::NoChange);
        assert_eq!(evaluate(&config, load(5, 3), Some(last), last + 3600), ScaleDecision::ScaleTo(3));
    }

    #[test]
    fn scale_down_floors_at_min() {
        let config = test_config(4, 10, 0, 60);
        assert_eq!(evaluate(&config, load(5, 5), None, 1000), ScaleDecision::ScaleTo(4));
        assert_eq!(evaluate(&config, load(4, 4), None, 1000), ScaleDecision::NoChange);
    }

    #[test]
    fn balanced_reserve_is_steady() {
        let config = test_config(2, 10, 2, 60);
        assert_eq!(evaluate(&config, load(6, 2), None, 1000), ScaleDecision::NoChange);
    }

    #[test]
    fn evaluate_all_uses_update_log() {
        let scaler = FlexibleScaler::new(vec![test_config(2, 10, 1, 3600)]);
        let loads: BTreeMap<_, _> = [("shared.proc".to_string(), load(5, 3))].into_iter().collect();
        let log: BTreeMap<_, _> = [("shared.proc".to_string(), 1000u64)].into_iter().collect();

        assert!(scaler.evaluate_all(&loads, &log, 1010).is_empty());
        let updates = scaler.evaluate_all(&loads, &log, 4600);
        assert_eq!(
            updates,
            vec![FlexibleUpdate {
                global_id: "shared".to_string(),
                group_id: "proc".to_string(),
                from: 5,
                to: 3,
            }]
        );
        assert_eq!(updates[0].target_key(), "shared.proc");
    }

    #[test]
    fn targets_without_load_are_skipped() {
        let scaler = FlexibleScaler::new(vec![test_config(2, 10, 1, 3600)]);
        assert!(scaler.evaluate_all(&BTreeMap::new(), &BTreeMap::new(), 0).is_empty());
    }
}
