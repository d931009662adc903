//! Output routing for streaming splits
//!
//! Decides which split receives a batch produced on a given node.

use crate::learner::{LocalityHint, NodeId};

/// Routing policy across `n` split outputs
#[derive(Debug, Clone)]
pub struct SplitRouter {
    hint_nodes: Vec<Option<NodeId>>,
    equal: bool,
    cursor: usize,
}

impl SplitRouter {
    /// `hints[i]` is the node of the consumer of split `i`; missing hints
    /// leave a split without locality preference
    pub fn new(num_splits: usize, equal: bool, hints: Option<&[LocalityHint]>) -> Self {
        let hint_nodes = (0..num_splits)
            .map(|i| hints.and_then(|h| h.get(i)).map(|h| h.node.clone()))
            .collect();
        Self {
            hint_nodes,
            equal,
            cursor: 0,
        }
    }

    pub fn num_splits(&self) -> usize {
        self.hint_nodes.len()
    }

    pub fn is_equal(&self) -> bool {
        self.equal
    }

    /// Split candidates for a batch produced on `node`, best first.
    ///
    /// `loads[i]` is the number of batches queued for split `i`, `None`
    /// when the split's consumer is gone. Equal routing is strict
    /// round-robin; otherwise splits on `node` come first, then the rest
    /// by ascending load.
    pub fn route(&mut self, node: &str, loads: &[Option<usize>]) -> Vec<usize> {
        let n = self.num_splits();
        if n == 0 {
            return Vec::new();
        }
        let start = self.cursor % n;
        self.cursor = self.cursor.wrapping_add(1);

        let rotation = (0..n)
            .map(|k| (start + k) % n)
            .filter(|&i| loads.get(i).copied().flatten().is_some());

        if self.equal {
            return rotation.collect();
        }

        let (mut local, mut remote): (Vec<usize>, Vec<usize>) =
            rotation.partition(|&i| self.hint_nodes[i].as_deref() == Some(node));
        let load = |i: &usize| loads[*i].unwrap_or(usize::MAX);
        local.sort_by_key(load);
        remote.sort_by_key(load);
        local.extend(remote);
        local
    }
}
