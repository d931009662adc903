//! Offline prelearner
//!
//! One instance per map worker. It binds to a learner once, at
//! construction, and then processes raw batches sequentially.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::filter::ModuleFilter;
use super::resync::ModuleResync;
use crate::batch::{ColumnarBatch, MultiAgentBatch};
use crate::connector::{ConnectorBuilder, LearnerConnector};
use crate::episode::{rows_to_episodes, AgentMode};
use crate::error::Result;
use crate::learner::{
    select_learner, Learner, LocalityHint, ModelSnapshot, ModuleSpec, RemoteLearner, RlModule,
    SharedModule,
};
use crate::metrics::PrelearnerMetrics;
use crate::runtime::WorkerContext;
use crate::schema::SchemaMapping;

/// Settings shared by every unit of a pipeline
#[derive(Clone)]
pub struct PreLearnerConfig {
    pub agent_mode: AgentMode,
    pub schema_mapping: SchemaMapping,
    pub module_filter: ModuleFilter,
    pub connector: Arc<dyn ConnectorBuilder>,
    /// Invocations between background state refreshes of remote-bound units
    pub module_synch_period: Option<u64>,
    pub metrics: Arc<PrelearnerMetrics>,
}

impl PreLearnerConfig {
    pub fn new(connector: Arc<dyn ConnectorBuilder>) -> Self {
        Self {
            agent_mode: AgentMode::SingleAgent,
            schema_mapping: SchemaMapping::identity(),
            module_filter: ModuleFilter::AllModules,
            connector,
            module_synch_period: None,
            metrics: Arc::new(PrelearnerMetrics::new()),
        }
    }
}

/// The learner(s) a unit may bind to
#[derive(Clone)]
pub enum LearnerBinding {
    /// Learner in this process; its module is used directly
    Local(Arc<dyn Learner>),
    /// Learners in other processes; the unit owns a module built from
    /// `module_spec` and seeded with `module_state`
    Remote {
        handles: Vec<Arc<dyn RemoteLearner>>,
        locality_hints: Vec<LocalityHint>,
        module_spec: Arc<dyn ModuleSpec>,
        module_state: ModelSnapshot,
    },
}

/// Per-call output: one module-keyed batch under the `batch` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreLearnerOutput {
    pub batch: Vec<MultiAgentBatch>,
}

impl PreLearnerOutput {
    pub fn into_batch(self) -> Option<MultiAgentBatch> {
        self.batch.into_iter().next()
    }
}

enum UnitModule {
    Live(SharedModule),
    Owned {
        module: Box<dyn RlModule>,
        learner: Arc<dyn RemoteLearner>,
        resync: Option<ModuleResync>,
    },
}

/// Transform unit turning raw batches into module-keyed batches
pub struct OfflinePreLearner {
    config: PreLearnerConfig,
    module: UnitModule,
    connector: Box<dyn LearnerConnector>,
    context: WorkerContext,
}

impl OfflinePreLearner {
    /// Build a unit and bind it to a learner
    pub fn new(
        config: PreLearnerConfig,
        binding: LearnerBinding,
        context: WorkerContext,
    ) -> Result<Self> {
        let module = match binding {
            LearnerBinding::Local(learner) => {
                debug!("Worker {} using local learner module", context.worker_index);
                UnitModule::Live(learner.module())
            }
            LearnerBinding::Remote {
                handles,
                locality_hints,
                module_spec,
                module_state,
            } => {
                let mut rng = match context.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let learner =
                    select_learner(&handles, &locality_hints, &context.node_id, &mut rng)?;
                let mut module = module_spec.build()?;
                module.set_state(&module_state)?;
                debug!(
                    "Worker {} on node {} bound to learner {} (state crc32c={:08x})",
                    context.worker_index,
                    context.node_id,
                    learner.id(),
                    module_state.checksum()
                );
                UnitModule::Owned {
                    module,
                    learner,
                    resync: config.module_synch_period.map(ModuleResync::new),
                }
            }
        };
        let connector = config.connector.build()?;
        config.metrics.active_units.inc();

        Ok(Self {
            config,
            module,
            connector,
            context,
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.module, UnitModule::Owned { .. })
    }

    /// Id of the bound remote learner
    pub fn bound_learner(&self) -> Option<String> {
        match &self.module {
            UnitModule::Live(_) => None,
            UnitModule::Owned { learner, .. } => Some(learner.id()),
        }
    }

    /// Current state of the module the connector runs against
    pub fn module_state(&self) -> ModelSnapshot {
        match &self.module {
            UnitModule::Live(module) => module.read().get_state(),
            UnitModule::Owned { module, .. } => module.get_state(),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Process one raw batch
    pub fn call(&mut self, batch: &ColumnarBatch) -> Result<PreLearnerOutput> {
        let start = Instant::now();
        let metrics = self.config.metrics.clone();

        let episodes =
            rows_to_episodes(batch, self.config.agent_mode, &self.config.schema_mapping)?;

        let module_data = match &mut self.module {
            UnitModule::Live(module) => {
                let module = module.read();
                self.connector.apply(&*module, &episodes)?
            }
            UnitModule::Owned {
                module,
                learner,
                resync,
            } => {
                if let Some(resync) = resync {
                    if resync.tick(learner, module.as_mut()) {
                        metrics.snapshot_swaps.inc();
                    }
                }
                self.connector.apply(module.as_ref(), &episodes)?
            }
        };

        let env_steps = episodes.iter().map(|e| e.env_steps()).sum();
        let mut output = MultiAgentBatch::new(module_data, env_steps);
        let dropped = self.config.module_filter.apply(&mut output);

        metrics.batches_processed.inc();
        metrics.episodes_built.inc_by(episodes.len() as u64);
        metrics.env_steps.inc_by(env_steps);
        metrics.modules_filtered.inc_by(dropped as u64);
        metrics.transform_latency.observe(start.elapsed());

        Ok(PreLearnerOutput { batch: vec![output] })
    }
}

impl Drop for OfflinePreLearner {
    fn drop(&mut self) {
        self.config.metrics.active_units.dec();
    }
}

impl std::fmt::Debug for OfflinePreLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflinePreLearner")
            .field("context", &self.context)
            .field("remote", &self.is_remote())
            .field("bound_learner", &self.bound_learner())
            .finish()
    }
}
