use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::batch::{ModuleId, MultiAgentBatch};

/// Predicate deciding whether a module trains on a batch
pub type ModulePredicate = dyn Fn(&str, &MultiAgentBatch) -> bool + Send + Sync;

/// Which modules keep their sub-batch after the connector ran
#[derive(Clone, Default)]
pub enum ModuleFilter {
    #[default]
    AllModules,
    FixedSet(BTreeSet<ModuleId>),
    Predicate(Arc<ModulePredicate>),
}

impl ModuleFilter {
    /// `None` or an empty list trains every module
    pub fn from_policies(policies: Option<&[ModuleId]>) -> Self {
        match policies {
            Some(ids) if !ids.is_empty() => ModuleFilter::FixedSet(ids.iter().cloned().collect()),
            _ => ModuleFilter::AllModules,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &MultiAgentBatch) -> bool + Send + Sync + 'static,
    {
        ModuleFilter::Predicate(Arc::new(f))
    }

    pub fn should_update(&self, module_id: &str, batch: &MultiAgentBatch) -> bool {
        match self {
            ModuleFilter::AllModules => true,
            ModuleFilter::FixedSet(ids) => ids.contains(module_id),
            ModuleFilter::Predicate(f) => f(module_id, batch),
        }
    }

    /// Drop every module that should not be updated. Decisions are taken
    /// against the unfiltered batch. Returns the number of dropped modules.
    pub fn apply(&self, batch: &mut MultiAgentBatch) -> usize {
        if matches!(self, ModuleFilter::AllModules) {
            return 0;
        }
        let dropped: Vec<ModuleId> = batch
            .module_ids()
            .into_iter()
            .filter(|id| !self.should_update(id, batch))
            .collect();
        for id in &dropped {
            batch.remove(id);
        }
        dropped.len()
    }
}

impl fmt::Debug for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleFilter::AllModules => f.write_str("AllModules"),
            ModuleFilter::FixedSet(ids) => f.debug_tuple("FixedSet").field(ids).finish(),
            ModuleFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
