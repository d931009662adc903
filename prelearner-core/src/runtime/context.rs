//! Identity of the worker running a transform unit

use crate::learner::NodeId;

/// Node id used when no cluster layout is configured
pub const LOCAL_NODE: &str = "local";

/// Where a transform unit runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    /// Node hosting the worker
    pub node_id: NodeId,
    /// Index of the worker within its map stage
    pub worker_index: usize,
    /// Seed for the unit's random choices; `None` draws from entropy
    pub seed: Option<u64>,
}

impl WorkerContext {
    pub fn new(node_id: impl Into<NodeId>, worker_index: usize) -> Self {
        Self {
            node_id: node_id.into(),
            worker_index,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Single-node context
    pub fn local() -> Self {
        Self::new(LOCAL_NODE, 0)
    }
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::local()
    }
}
