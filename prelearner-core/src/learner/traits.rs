use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::affinity::{LocalityHint, NodeId};
use super::snapshot::ModelSnapshot;
use crate::batch::ModuleId;
use crate::error::{PrelearnerError, Result};

/// A trainable (multi-)module
pub trait RlModule: Send + Sync {
    fn get_state(&self) -> ModelSnapshot;
    fn set_state(&mut self, state: &ModelSnapshot) -> Result<()>;
    fn module_ids(&self) -> Vec<ModuleId>;
}

/// Module shared with a local learner that keeps updating it
pub type SharedModule = Arc<RwLock<dyn RlModule>>;

/// Builds fresh module instances, used where a live reference is unavailable
pub trait ModuleSpec: Send + Sync {
    fn build(&self) -> Result<Box<dyn RlModule>>;
}

/// A learner in the same process
pub trait Learner: Send + Sync {
    /// Live reference to the module being trained
    fn module(&self) -> SharedModule;
}

/// A learner in another process, reachable only by request
#[async_trait]
pub trait RemoteLearner: Send + Sync {
    fn id(&self) -> String;

    /// Node the learner runs on
    fn node_id(&self) -> NodeId;

    /// Fetch the state of `component` (e.g. the RL module)
    async fn get_state(&self, component: &str) -> Result<ModelSnapshot>;
}

/// The learners training on the sampled data
#[derive(Clone)]
pub enum LearnerGroup {
    Local(Arc<dyn Learner>),
    Remote {
        handles: Vec<Arc<dyn RemoteLearner>>,
        /// One hint per handle, same order
        locality_hints: Vec<LocalityHint>,
        module_spec: Arc<dyn ModuleSpec>,
    },
}

impl LearnerGroup {
    /// Remote group with hints derived from each handle's node
    pub fn remote(handles: Vec<Arc<dyn RemoteLearner>>, module_spec: Arc<dyn ModuleSpec>) -> Self {
        let locality_hints = handles
            .iter()
            .map(|h| LocalityHint::new(h.id(), h.node_id()))
            .collect();
        LearnerGroup::Remote {
            handles,
            locality_hints,
            module_spec,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LearnerGroup::Local(_) => 1,
            LearnerGroup::Remote { handles, .. } => handles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn locality_hints(&self) -> Option<&[LocalityHint]> {
        match self {
            LearnerGroup::Local(_) => None,
            LearnerGroup::Remote { locality_hints, .. } => Some(locality_hints),
        }
    }

    /// Check the handle and hint sequences line up
    pub fn validate(&self) -> Result<()> {
        if let LearnerGroup::Remote {
            handles,
            locality_hints,
            ..
        } = self
        {
            if handles.is_empty() {
                return Err(PrelearnerError::NoLearners);
            }
            if handles.len() != locality_hints.len() {
                return Err(PrelearnerError::LocalityHintMismatch {
                    handles: handles.len(),
                    hints: locality_hints.len(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for LearnerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnerGroup::Local(_) => f.write_str("LearnerGroup::Local"),
            LearnerGroup::Remote { locality_hints, .. } => f
                .debug_struct("LearnerGroup::Remote")
                .field("locality_hints", locality_hints)
                .finish(),
        }
    }
}
