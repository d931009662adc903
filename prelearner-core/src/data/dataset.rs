//! Loaded datasets
//!
//! A dataset is an ordered list of immutable blocks plus metadata about
//! where it was read from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::pipeline::{BatchMapper, MapOptions, MappedDataset};
use crate::batch::ColumnarBatch;
use crate::error::Result;
use crate::learner::NodeId;
use crate::runtime::{ShutdownSignal, WorkerContext, LOCAL_NODE};

/// Column names present in a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub columns: Vec<String>,
}

impl fmt::Display for DatasetSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema[{}]", self.columns.join(", "))
    }
}

/// Where and when a dataset was read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: uuid::Uuid,
    pub sources: Vec<String>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl DatasetMetadata {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            sources,
            loaded_at: chrono::Utc::now(),
        }
    }
}

/// Cluster layout transform workers are placed on
#[derive(Clone)]
pub struct ExecutionContext {
    /// Nodes assigned to map workers round-robin
    pub worker_nodes: Vec<NodeId>,
    /// Base seed for worker and shuffle randomness; `None` uses entropy
    pub seed: Option<u64>,
    pub shutdown: ShutdownSignal,
}

impl ExecutionContext {
    pub fn worker_context(&self, worker_index: usize) -> WorkerContext {
        let node = if self.worker_nodes.is_empty() {
            LOCAL_NODE.to_string()
        } else {
            self.worker_nodes[worker_index % self.worker_nodes.len()].clone()
        };
        let context = WorkerContext::new(node, worker_index);
        match self.seed {
            Some(seed) => context.with_seed(seed.wrapping_add(worker_index as u64)),
            None => context,
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            worker_nodes: vec![LOCAL_NODE.to_string()],
            seed: None,
            shutdown: ShutdownSignal::new(),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("worker_nodes", &self.worker_nodes)
            .field("seed", &self.seed)
            .field("shutdown", &self.shutdown.is_shutdown())
            .finish()
    }
}

/// Immutable, block-partitioned rows
#[derive(Debug, Clone)]
pub struct Dataset {
    blocks: Vec<Arc<ColumnarBatch>>,
    metadata: DatasetMetadata,
    execution: ExecutionContext,
}

impl Dataset {
    pub fn from_blocks(blocks: Vec<ColumnarBatch>, metadata: DatasetMetadata) -> Self {
        Self {
            blocks: blocks
                .into_iter()
                .filter(|b| !b.is_empty())
                .map(Arc::new)
                .collect(),
            metadata,
            execution: ExecutionContext::default(),
        }
    }

    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn blocks(&self) -> &[Arc<ColumnarBatch>] {
        &self.blocks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.num_rows()).sum()
    }

    /// Union of column names across blocks, sorted
    pub fn schema(&self) -> DatasetSchema {
        let mut columns: Vec<String> = self
            .blocks
            .iter()
            .flat_map(|b| b.column_names())
            .map(str::to_string)
            .collect();
        columns.sort();
        columns.dedup();
        DatasetSchema { columns }
    }

    /// Redistribute rows into `num_blocks` blocks of near-equal size.
    /// Fails if blocks do not share a column set.
    pub fn repartition(self, num_blocks: usize) -> Result<Self> {
        let total = self.num_rows();
        let num_blocks = num_blocks.max(1).min(total.max(1));
        if total == 0 || num_blocks == self.blocks.len() {
            return Ok(self);
        }

        let refs: Vec<&ColumnarBatch> = self.blocks.iter().map(Arc::as_ref).collect();
        let all = ColumnarBatch::concat(&refs)?;

        let base = total / num_blocks;
        let extra = total % num_blocks;
        let mut blocks = Vec::with_capacity(num_blocks);
        let mut start = 0;
        for i in 0..num_blocks {
            let len = base + usize::from(i < extra);
            blocks.push(Arc::new(all.slice(start, len)));
            start += len;
        }

        Ok(Self { blocks, ..self })
    }

    /// Lazily map every batch of `options.batch_size` rows through
    /// transform units built by `factory`, one per worker
    pub fn map_batches<F>(&self, factory: F, options: MapOptions) -> MappedDataset
    where
        F: Fn(WorkerContext) -> Result<Box<dyn BatchMapper>> + Send + Sync + 'static,
    {
        MappedDataset::new(self.clone(), Arc::new(factory), options)
    }
}
