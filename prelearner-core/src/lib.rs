//! Prelearner Core - offline sample preparation for distributed RL training
//!
//! This crate turns recorded environment transitions into training batches:
//! - Row-to-episode conversion of raw columnar batches
//! - Per-shard transform units bound to learners by node locality
//! - A streaming dataset engine with parallel workers and shard splits
//! - A sampling façade serving single batches or shard iterators

pub mod batch;
pub mod compression;
pub mod config;
pub mod connector;
pub mod data;
pub mod episode;
pub mod error;
pub mod learner;
pub mod metrics;
pub mod offline_data;
pub mod prelearner;
pub mod runtime;
pub mod schema;

pub use batch::{ColumnarBatch, ModuleId, MultiAgentBatch, Value, DEFAULT_MODULE_ID};
pub use config::{InputPaths, OfflineDataConfig};
pub use episode::{rows_to_episodes, AgentMode, Episode, SingleAgentEpisode};
pub use error::{PrelearnerError, Result};
pub use offline_data::{DatasetState, OfflineData, SampleOutput};
pub use prelearner::{ModuleFilter, OfflinePreLearner};

/// Multiple of `num_samples` held in the local shuffle buffer
pub const DEFAULT_SHUFFLE_BUFFER_FACTOR: usize = 10;

/// Default transform concurrency in single-iterator modes
pub const DEFAULT_MAP_CONCURRENCY: usize = 2;
