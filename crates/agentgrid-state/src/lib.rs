//! agentgrid-state — durable assignment history.
//!
//! Backed by [redb](https://docs.rs/redb). Each scheduling scope (the
//! global maintainer, or one build job) persists its latest
//! `AssignmentMap` under a string key. Values are JSON, gzip-compressed
//! before write and decompressed on read; a read or decompression
//! failure surfaces as a `StateError` so callers refuse to schedule on
//! history they could not load.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod codec;
pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{AssignmentStore, StateStore};
