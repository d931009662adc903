//! Minimal module and learner implementations
//!
//! `SnapshotModule` stores its parameters as an opaque snapshot. It is
//! enough to drive connectors that only read module ids, and is what the
//! operator CLI and tests run against.

use parking_lot::RwLock;
use std::sync::Arc;

use super::snapshot::ModelSnapshot;
use super::traits::{Learner, ModuleSpec, RlModule, SharedModule};
use crate::batch::ModuleId;
use crate::error::Result;

/// Module whose parameters are the snapshot it was last given
#[derive(Debug, Clone, Default)]
pub struct SnapshotModule {
    module_ids: Vec<ModuleId>,
    state: ModelSnapshot,
}

impl SnapshotModule {
    pub fn new(module_ids: Vec<ModuleId>) -> Self {
        Self {
            module_ids,
            state: ModelSnapshot::new(),
        }
    }
}

impl RlModule for SnapshotModule {
    fn get_state(&self) -> ModelSnapshot {
        self.state.clone()
    }

    fn set_state(&mut self, state: &ModelSnapshot) -> Result<()> {
        for id in state.module_ids() {
            if !self.module_ids.contains(&id) {
                self.module_ids.push(id);
            }
        }
        self.state = state.clone();
        Ok(())
    }

    fn module_ids(&self) -> Vec<ModuleId> {
        self.module_ids.clone()
    }
}

/// Spec building empty [`SnapshotModule`]s
#[derive(Debug, Clone)]
pub struct SnapshotModuleSpec {
    module_ids: Vec<ModuleId>,
}

impl SnapshotModuleSpec {
    pub fn new(module_ids: Vec<ModuleId>) -> Self {
        Self { module_ids }
    }
}

impl ModuleSpec for SnapshotModuleSpec {
    fn build(&self) -> Result<Box<dyn RlModule>> {
        Ok(Box::new(SnapshotModule::new(self.module_ids.clone())))
    }
}

/// Local learner exposing a shared module it never updates itself
#[derive(Clone)]
pub struct StaticLearner {
    module: SharedModule,
}

impl StaticLearner {
    pub fn new<M: RlModule + 'static>(module: M) -> Self {
        Self {
            module: Arc::new(RwLock::new(module)),
        }
    }
}

impl Learner for StaticLearner {
    fn module(&self) -> SharedModule {
        self.module.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_set_state_registers_modules() {
        let mut module = SnapshotModule::new(vec!["p0".into()]);
        let state = ModelSnapshot::new()
            .with_module("p0", Bytes::from_static(b"a"))
            .with_module("p1", Bytes::from_static(b"b"));
        module.set_state(&state).unwrap();
        assert_eq!(module.module_ids(), vec!["p0".to_string(), "p1".to_string()]);
        assert_eq!(module.get_state(), state);
    }

    #[test]
    fn test_static_learner_shares_module() {
        let learner = StaticLearner::new(SnapshotModule::new(vec!["p0".into()]));
        let state = ModelSnapshot::new().with_module("p0", Bytes::from_static(b"w"));
        learner.module().write().set_state(&state).unwrap();
        assert_eq!(learner.module().read().get_state(), state);
    }
}
