//! Learner connector pipeline
//!
//! A connector turns episodes into per-module training columns. Its
//! internal logic belongs to the learner; this crate only needs the
//! [`LearnerConnector`] seam and a default implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::batch::{ColumnarBatch, ModuleId, Value, DEFAULT_MODULE_ID};
use crate::episode::Episode;
use crate::error::{PrelearnerError, Result};
use crate::learner::RlModule;
use crate::schema;

/// Per-module column data produced by a connector
pub type ModuleData = BTreeMap<ModuleId, ColumnarBatch>;

/// Runs the learner-side transform over a sequence of episodes
pub trait LearnerConnector: Send {
    fn apply(&mut self, module: &dyn RlModule, episodes: &[Episode]) -> Result<ModuleData>;
}

/// Builds one connector per transform unit
pub trait ConnectorBuilder: Send + Sync {
    fn build(&self) -> Result<Box<dyn LearnerConnector>>;
}

impl<F> ConnectorBuilder for F
where
    F: Fn() -> Result<Box<dyn LearnerConnector>> + Send + Sync,
{
    fn build(&self) -> Result<Box<dyn LearnerConnector>> {
        self()
    }
}

/// Flattens each transition into one row of a single module's sub-batch.
///
/// Output columns: episode id, observation, next observation, action,
/// reward, terminated and truncated flags, plus every extra model output.
///
/// Rows go to the module's only id, or to the default id when the module
/// holds several.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector;

impl DefaultConnector {
    pub fn new() -> Self {
        Self
    }

    /// Builder producing a fresh default connector per unit
    pub fn builder() -> Arc<dyn ConnectorBuilder> {
        Arc::new(|| -> Result<Box<dyn LearnerConnector>> { Ok(Box::new(DefaultConnector::new())) })
    }

    fn target_module(&self, module: &dyn RlModule) -> ModuleId {
        match module.module_ids().as_slice() {
            [only] => only.clone(),
            _ => DEFAULT_MODULE_ID.to_string(),
        }
    }
}

impl LearnerConnector for DefaultConnector {
    fn apply(&mut self, module: &dyn RlModule, episodes: &[Episode]) -> Result<ModuleData> {
        let mut columns: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (i, episode) in episodes.iter().enumerate() {
            let Episode::SingleAgent(e) = episode;
            if e.observations.len() != 2 || e.actions.len() != 1 || e.rewards.len() != 1 {
                return Err(PrelearnerError::pipeline(format!(
                    "episode {} does not hold exactly one transition",
                    i
                )));
            }
            let mut push = |name: &str, value: Value| {
                columns.entry(name.to_string()).or_default().push(value);
            };
            push(schema::EPS_ID, Value::Str(e.id.clone()));
            push(schema::OBS, e.observations[0].clone());
            push(schema::NEXT_OBS, e.observations[1].clone());
            push(schema::ACTIONS, e.actions[0].clone());
            push(schema::REWARDS, Value::Float(e.rewards[0]));
            push(schema::TERMINATEDS, Value::Bool(e.terminated));
            push(schema::TRUNCATEDS, Value::Bool(e.truncated));
            for (name, values) in &e.extra_model_outputs {
                push(name, values.first().cloned().unwrap_or(Value::Null));
            }
        }

        let mut data = ModuleData::new();
        if episodes.is_empty() {
            return Ok(data);
        }
        data.insert(self.target_module(module), ColumnarBatch::from_columns(columns)?);
        Ok(data)
    }
}
