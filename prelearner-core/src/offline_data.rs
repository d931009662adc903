//! Dataset access and sampling
//!
//! `OfflineData` loads the recorded dataset once and hands out training
//! batches in three shapes: a single batch, one reusable iterator, or one
//! iterator per learner shard.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::batch::MultiAgentBatch;
use crate::config::OfflineDataConfig;
use crate::connector::{ConnectorBuilder, DefaultConnector};
use crate::data::{
    BatchIterator, BatchMapper, DataIterator, Dataset, ExecutionContext, IterOptions, MapOptions,
    ReaderRegistry,
};
use crate::episode::AgentMode;
use crate::error::{PrelearnerError, Result};
use crate::learner::{
    LearnerGroup, LocalityHint, ModelSnapshot, NodeId, RemoteLearner, COMPONENT_RL_MODULE,
};
use crate::metrics::PrelearnerMetrics;
use crate::prelearner::{LearnerBinding, ModuleFilter, OfflinePreLearner, PreLearnerConfig};
use crate::runtime::{ShutdownSignal, WorkerContext, LOCAL_NODE};

/// Whether the dataset could be loaded at construction
#[derive(Debug, Clone)]
pub enum DatasetState {
    /// Loading failed; every sample call reports the reason
    Unloaded { reason: String },
    Ready(Dataset),
}

/// Result of [`OfflineData::sample`]
#[derive(Debug)]
pub enum SampleOutput {
    Batch(MultiAgentBatch),
    Iterator(DataIterator),
    Shards(Vec<BatchIterator>),
}

impl SampleOutput {
    pub fn into_batch(self) -> Option<MultiAgentBatch> {
        match self {
            SampleOutput::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn into_iterator(self) -> Option<DataIterator> {
        match self {
            SampleOutput::Iterator(iterator) => Some(iterator),
            _ => None,
        }
    }

    pub fn into_shards(self) -> Option<Vec<BatchIterator>> {
        match self {
            SampleOutput::Shards(shards) => Some(shards),
            _ => None,
        }
    }
}

struct CachedIterator {
    num_samples: usize,
    iterator: DataIterator,
}

/// Sampling façade over an offline dataset
pub struct OfflineData {
    config: OfflineDataConfig,
    state: DatasetState,
    learners: Option<LearnerGroup>,
    connector: Arc<dyn ConnectorBuilder>,
    module_filter: ModuleFilter,
    worker_nodes: Vec<NodeId>,
    primary_node: Option<NodeId>,
    metrics: Arc<PrelearnerMetrics>,
    shutdown: ShutdownSignal,
    cached: Option<CachedIterator>,
}

impl OfflineData {
    /// Load the configured dataset.
    ///
    /// Only an invalid configuration is an error here. A failed load is
    /// logged and leaves the instance unloaded.
    pub async fn new(config: OfflineDataConfig, registry: &ReaderRegistry) -> Result<Self> {
        config.validate()?;

        let state = match load_dataset(&config, registry).await {
            Ok(dataset) => {
                info!(
                    "Loaded dataset from {:?}: {}, {} blocks, {} rows",
                    dataset.metadata().sources,
                    dataset.schema(),
                    dataset.num_blocks(),
                    dataset.num_rows()
                );
                DatasetState::Ready(dataset)
            }
            Err(e) => {
                error!(
                    "Failed to load dataset from {:?} with {}: {}",
                    config.input, config.input_read_method, e
                );
                DatasetState::Unloaded {
                    reason: e.to_string(),
                }
            }
        };

        Ok(Self {
            module_filter: ModuleFilter::from_policies(config.policies_to_train.as_deref()),
            config,
            state,
            learners: None,
            connector: DefaultConnector::builder(),
            worker_nodes: vec![LOCAL_NODE.to_string()],
            primary_node: None,
            metrics: Arc::new(PrelearnerMetrics::new()),
            shutdown: ShutdownSignal::new(),
            cached: None,
        })
    }

    /// Learners the sampled batches are prepared for
    pub fn with_learners(mut self, learners: LearnerGroup) -> Self {
        self.learners = Some(learners);
        self.cached = None;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn ConnectorBuilder>) -> Self {
        self.connector = connector;
        self.cached = None;
        self
    }

    /// Overrides the filter derived from `policies_to_train`
    pub fn with_module_filter(mut self, filter: ModuleFilter) -> Self {
        self.module_filter = filter;
        self.cached = None;
        self
    }

    /// Nodes transform workers are placed on, round-robin
    pub fn with_worker_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        if !nodes.is_empty() {
            self.worker_nodes = nodes;
        }
        self.cached = None;
        self
    }

    /// Node whose learner is asked for the module snapshot; the first
    /// handle when unset or when no learner runs there
    pub fn with_primary_node(mut self, node: impl Into<NodeId>) -> Self {
        self.primary_node = Some(node.into());
        self
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, DatasetState::Ready(_))
    }

    pub fn state(&self) -> &DatasetState {
        &self.state
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        match &self.state {
            DatasetState::Ready(dataset) => Some(dataset),
            DatasetState::Unloaded { .. } => None,
        }
    }

    pub fn config(&self) -> &OfflineDataConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PrelearnerMetrics> {
        &self.metrics
    }

    /// Cancel every pipeline started by this instance
    pub fn shutdown(&self) {
        info!("Shutting down offline data pipelines");
        self.shutdown.shutdown();
    }

    /// Sample training data.
    ///
    /// - `return_iterator = false`: one module-keyed batch of `num_samples` rows
    /// - `return_iterator = true, num_shards <= 1`: the cached reusable iterator
    /// - `return_iterator = true, num_shards > 1`: one iterator per shard,
    ///   all seeded with a single snapshot fetched from the primary learner
    pub async fn sample(
        &mut self,
        num_samples: usize,
        return_iterator: bool,
        num_shards: usize,
    ) -> Result<SampleOutput> {
        self.ready_dataset()?;
        if num_samples == 0 {
            return Err(PrelearnerError::InvalidConfig {
                reason: "num_samples must be at least 1".into(),
            });
        }

        if !return_iterator {
            return self.sample_batch(num_samples).await.map(SampleOutput::Batch);
        }
        if num_shards <= 1 {
            return self.single_iterator(num_samples).await.map(SampleOutput::Iterator);
        }
        self.shard_iterators(num_samples, num_shards)
            .await
            .map(SampleOutput::Shards)
    }

    async fn sample_batch(&mut self, num_samples: usize) -> Result<MultiAgentBatch> {
        let iterator = self.single_iterator(num_samples).await?;
        match iterator.next_batch().await {
            Err(PrelearnerError::DataExhausted) => {
                debug!("Cached iterator exhausted, starting a new pass");
                self.cached = None;
                self.single_iterator(num_samples).await?.next_batch().await
            }
            result => result,
        }
    }

    async fn single_iterator(&mut self, num_samples: usize) -> Result<DataIterator> {
        if let Some(cached) = &self.cached {
            if cached.num_samples == num_samples {
                return Ok(cached.iterator.clone());
            }
            debug!(
                "Rebuilding iterator: num_samples changed from {} to {}",
                cached.num_samples, num_samples
            );
        }

        let dataset = self.ready_dataset()?;
        let binding = self.single_binding().await?;
        let mapped = dataset.map_batches(
            self.unit_factory(binding),
            MapOptions {
                concurrency: self.config.map_concurrency,
                batch_size: num_samples,
                zero_copy_batch: false,
            },
        );
        let iterator = DataIterator::new(mapped.iter_batches(IterOptions {
            prefetch_batches: self.config.prefetch_batches,
            local_shuffle_buffer_size: Some(num_samples * self.config.shuffle_buffer_factor),
            local_shuffle_seed: self.config.seed,
        }));
        debug!(
            "Built iterator: batch_size={}, concurrency={}",
            num_samples, self.config.map_concurrency
        );

        self.cached = Some(CachedIterator {
            num_samples,
            iterator: iterator.clone(),
        });
        Ok(iterator)
    }

    async fn shard_iterators(
        &mut self,
        num_samples: usize,
        num_shards: usize,
    ) -> Result<Vec<BatchIterator>> {
        let dataset = self.ready_dataset()?;
        let learners = self.learner_group()?;

        let (binding, hints) = match learners {
            LearnerGroup::Local(learner) => (LearnerBinding::Local(learner), None),
            LearnerGroup::Remote {
                handles,
                locality_hints,
                module_spec,
            } => {
                let primary = self.primary_handle(&handles)?;
                let module_state = self.fetch_snapshot(&primary).await?;
                let binding = LearnerBinding::Remote {
                    handles,
                    locality_hints: locality_hints.clone(),
                    module_spec,
                    module_state,
                };
                (binding, Some(locality_hints))
            }
        };

        let mapped = dataset.map_batches(
            self.unit_factory(binding),
            MapOptions {
                concurrency: num_shards,
                batch_size: num_samples,
                zero_copy_batch: true,
            },
        );
        let shards = mapped.streaming_split(
            num_shards,
            false,
            hints.as_deref(),
            IterOptions {
                prefetch_batches: self.config.prefetch_batches,
                local_shuffle_buffer_size: None,
                local_shuffle_seed: self.config.seed,
            },
        );
        debug!("Built {} shard iterators, batch_size={}", shards.len(), num_samples);
        Ok(shards)
    }

    /// Binding for single-iterator modes: a local learner as-is, a remote
    /// group narrowed to its primary learner
    async fn single_binding(&self) -> Result<LearnerBinding> {
        match self.learner_group()? {
            LearnerGroup::Local(learner) => Ok(LearnerBinding::Local(learner)),
            LearnerGroup::Remote {
                handles,
                locality_hints,
                module_spec,
            } => {
                let primary = self.primary_handle(&handles)?;
                let module_state = self.fetch_snapshot(&primary).await?;
                let hint = locality_hints
                    .iter()
                    .find(|h| h.learner == primary.id())
                    .cloned()
                    .unwrap_or_else(|| LocalityHint::new(primary.id(), primary.node_id()));
                Ok(LearnerBinding::Remote {
                    handles: vec![primary],
                    locality_hints: vec![hint],
                    module_spec,
                    module_state,
                })
            }
        }
    }

    fn unit_factory(
        &self,
        binding: LearnerBinding,
    ) -> impl Fn(WorkerContext) -> Result<Box<dyn BatchMapper>> + Send + Sync + 'static {
        let mut config = PreLearnerConfig::new(self.connector.clone());
        config.agent_mode = if self.config.multi_agent {
            AgentMode::MultiAgent
        } else {
            AgentMode::SingleAgent
        };
        config.schema_mapping = self.config.schema_mapping.clone();
        config.module_filter = self.module_filter.clone();
        config.module_synch_period = self.config.prelearner_module_synch_period;
        config.metrics = self.metrics.clone();

        move |context| {
            let unit = OfflinePreLearner::new(config.clone(), binding.clone(), context)?;
            Ok(Box::new(unit) as Box<dyn BatchMapper>)
        }
    }

    fn learner_group(&self) -> Result<LearnerGroup> {
        let learners = self.learners.clone().ok_or(PrelearnerError::NoLearners)?;
        learners.validate()?;
        Ok(learners)
    }

    fn primary_handle(&self, handles: &[Arc<dyn RemoteLearner>]) -> Result<Arc<dyn RemoteLearner>> {
        let on_primary_node = self
            .primary_node
            .as_ref()
            .and_then(|node| handles.iter().find(|h| &h.node_id() == node));
        on_primary_node
            .or_else(|| handles.first())
            .cloned()
            .ok_or(PrelearnerError::NoLearners)
    }

    /// One bounded `get_state` call; never retried
    async fn fetch_snapshot(&self, learner: &Arc<dyn RemoteLearner>) -> Result<ModelSnapshot> {
        let after = self.config.snapshot_timeout();
        let fetch = tokio::time::timeout(after, learner.get_state(COMPONENT_RL_MODULE));
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(PrelearnerError::Cancelled),
            result = fetch => result,
        };

        let snapshot = result
            .map_err(|_| PrelearnerError::Timeout {
                operation: format!("snapshot fetch from learner {}", learner.id()),
                after,
            })?
            .map_err(|e| PrelearnerError::SnapshotFetchFailed {
                learner: learner.id(),
                reason: e.to_string(),
            })?;
        debug!(
            "Fetched snapshot from learner {} ({} bytes, crc32c={:08x})",
            learner.id(),
            snapshot.size(),
            snapshot.checksum()
        );
        Ok(snapshot)
    }

    fn ready_dataset(&self) -> Result<Dataset> {
        match &self.state {
            DatasetState::Ready(dataset) => Ok(dataset.clone().with_execution(ExecutionContext {
                worker_nodes: self.worker_nodes.clone(),
                seed: self.config.seed,
                shutdown: self.shutdown.clone(),
            })),
            DatasetState::Unloaded { reason } => Err(PrelearnerError::DatasetUnavailable {
                reason: reason.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for OfflineData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineData")
            .field("input", &self.config.input)
            .field("ready", &self.is_ready())
            .field("learners", &self.learners)
            .field("worker_nodes", &self.worker_nodes)
            .field("cached_iterator", &self.cached.as_ref().map(|c| c.num_samples))
            .finish()
    }
}

async fn load_dataset(config: &OfflineDataConfig, registry: &ReaderRegistry) -> Result<Dataset> {
    let paths: Vec<PathBuf> = config.input.to_vec();
    if config.input.is_empty() {
        return Err(PrelearnerError::InvalidConfig {
            reason: "no input paths configured".into(),
        });
    }
    let reader = registry.get(&config.input_read_method)?;
    let kwargs = config.read_kwargs();

    let after = config.load_timeout();
    tokio::time::timeout(after, reader.load(&paths, &kwargs))
        .await
        .map_err(|_| PrelearnerError::Timeout {
            operation: format!("dataset load with {}", config.input_read_method),
            after,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Row, Value};
    use crate::data::ItemsReader;
    use crate::learner::{SnapshotModule, StaticLearner};

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::from([
                    ("eps_id".to_string(), Value::from(format!("e{}", i))),
                    ("obs".to_string(), Value::Float(i as f64)),
                    ("actions".to_string(), Value::Int(i % 2)),
                    ("rewards".to_string(), Value::Float(1.0)),
                    ("new_obs".to_string(), Value::Float(i as f64 + 1.0)),
                    ("terminateds".to_string(), Value::Bool(false)),
                    ("truncateds".to_string(), Value::Bool(false)),
                ])
            })
            .collect()
    }

    async fn offline(n: i64) -> OfflineData {
        let mut config = OfflineDataConfig::new("memory");
        config.input_read_method = "from_items".into();
        config.seed = Some(7);
        let registry = ReaderRegistry::with_defaults().with_reader(ItemsReader::new(rows(n)));
        let module = SnapshotModule::new(vec!["default_policy".into()]);
        let learners = LearnerGroup::Local(Arc::new(StaticLearner::new(module)));
        OfflineData::new(config, &registry)
            .await
            .unwrap()
            .with_learners(learners)
    }

    #[tokio::test]
    async fn test_unknown_reader_leaves_unloaded() {
        let mut config = OfflineDataConfig::new("/tmp/whatever");
        config.input_read_method = "read_parquet".into();
        let mut data = OfflineData::new(config, &ReaderRegistry::with_defaults()).await.unwrap();
        assert!(!data.is_ready());
        let err = data.sample(1, false, 0).await.unwrap_err();
        assert!(matches!(
            err,
            PrelearnerError::DatasetUnavailable { reason } if reason.contains("read_parquet")
        ));

        // Unavailability is reported before argument checks
        let err = data.sample(0, true, 4).await.unwrap_err();
        assert!(matches!(err, PrelearnerError::DatasetUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_zero_samples_is_invalid_once_loaded() {
        let mut data = offline(4).await;
        let err = data.sample(0, false, 0).await.unwrap_err();
        assert!(matches!(err, PrelearnerError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_iterator_is_cached_per_num_samples() {
        let mut data = offline(8).await;
        let first = data.sample(2, true, 1).await.unwrap().into_iterator().unwrap();
        let second = data.sample(2, true, 0).await.unwrap().into_iterator().unwrap();
        assert!(first.same_as(&second));

        let third = data.sample(4, true, 1).await.unwrap().into_iterator().unwrap();
        assert!(!first.same_as(&third));
    }

    #[tokio::test]
    async fn test_batch_mode_restarts_after_exhaustion() {
        let mut data = offline(2).await;
        for _ in 0..3 {
            let batch = data.sample(2, false, 0).await.unwrap().into_batch().unwrap();
            assert_eq!(batch.env_steps(), 2);
        }
    }

    #[tokio::test]
    async fn test_missing_learners() {
        let mut config = OfflineDataConfig::new("memory");
        config.input_read_method = "from_items".into();
        let registry = ReaderRegistry::empty().with_reader(ItemsReader::new(rows(2)));
        let mut data = OfflineData::new(config, &registry).await.unwrap();
        assert!(data.is_ready());
        assert!(matches!(data.sample(2, false, 0).await, Err(PrelearnerError::NoLearners)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sampling() {
        let mut data = offline(4).await;
        data.shutdown();
        assert!(matches!(data.sample(2, false, 0).await, Err(PrelearnerError::Cancelled)));
    }
}
