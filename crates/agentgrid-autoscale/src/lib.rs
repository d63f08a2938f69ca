//! agentgrid-autoscale — elastic node counts for global agent groups.
//!
//! Each `FlexibleScaleConfig` targets one `{globalId}.{groupId}` and keeps
//! a reserve of idle agent nodes between `min_node_count` and
//! `max_node_count`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! total = configured node count, idle = agents without target roles
//!
//! if total > max:            ScaleTo(max)
//! if total < min:            ScaleTo(min)
//! if idle < reserved:        ScaleTo(min(total + (reserved - idle), max))
//! if idle > reserved and total > min
//!    and now - last_update >= reduce_capacity_interval:
//!                            ScaleTo(max(total - (idle - reserved), min))
//! ```
//!
//! Growing is immediate; shrinking waits out the interval since the last
//! recorded update of the same target.

pub mod scaler;

pub use scaler::{FlexibleScaler, FlexibleUpdate, GroupLoad, ScaleDecision, evaluate};
