//! Per-shard transform unit
//!
//! Turns raw rows into episodes, runs the learner connector against the
//! unit's module and emits module-keyed batches.

pub mod filter;
pub mod resync;
pub mod unit;

pub use filter::ModuleFilter;
pub use resync::ModuleResync;
pub use unit::{LearnerBinding, OfflinePreLearner, PreLearnerConfig, PreLearnerOutput};
