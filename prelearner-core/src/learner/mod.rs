//! Learner-side collaborators
//!
//! Traits for the modules, learners and connectors the prelearner runs
//! against, plus learner affinity selection.

pub mod affinity;
pub mod module;
pub mod snapshot;
pub mod traits;

pub use affinity::{select_learner, LocalityHint, NodeId};
pub use module::{SnapshotModule, SnapshotModuleSpec, StaticLearner};
pub use snapshot::{ModelSnapshot, COMPONENT_RL_MODULE};
pub use traits::{Learner, LearnerGroup, ModuleSpec, RemoteLearner, RlModule, SharedModule};
