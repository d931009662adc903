//! Learner affinity selection
//!
//! Binds a transform unit to one learner, preferring a learner on the
//! unit's own node.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrelearnerError, Result};

/// Identity of a cluster node
pub type NodeId = String;

/// Associates a learner with the node it runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityHint {
    pub learner: String,
    pub node: NodeId,
}

impl LocalityHint {
    pub fn new(learner: impl Into<String>, node: impl Into<NodeId>) -> Self {
        Self {
            learner: learner.into(),
            node: node.into(),
        }
    }
}

/// Pick one handle for a worker on `local_node`.
///
/// Handles and hints are permuted together so that co-located workers do
/// not all bind to the same learner. The first permuted hint on
/// `local_node` wins; without a match a handle is drawn uniformly.
pub fn select_learner<H, R>(
    handles: &[H],
    hints: &[LocalityHint],
    local_node: &str,
    rng: &mut R,
) -> Result<H>
where
    H: Clone,
    R: Rng,
{
    if handles.is_empty() {
        return Err(PrelearnerError::NoLearners);
    }
    if handles.len() != hints.len() {
        return Err(PrelearnerError::LocalityHintMismatch {
            handles: handles.len(),
            hints: hints.len(),
        });
    }

    let mut order: Vec<usize> = (0..handles.len()).collect();
    order.shuffle(rng);

    if let Some(&idx) = order.iter().find(|&&i| hints[i].node == local_node) {
        debug!(
            "Bound to learner {} on local node {}",
            hints[idx].learner, local_node
        );
        return Ok(handles[idx].clone());
    }

    let idx = order[rng.gen_range(0..order.len())];
    debug!(
        "No learner on node {}, bound to learner {} on node {}",
        local_node, hints[idx].learner, hints[idx].node
    );
    Ok(handles[idx].clone())
}
