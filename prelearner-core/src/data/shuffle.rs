//! Local shuffle buffer
//!
//! Holds output batches until at least `min_steps` environment steps are
//! buffered, then releases them in random order.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::batch::MultiAgentBatch;

pub struct LocalShuffleBuffer {
    min_steps: u64,
    buffered_steps: u64,
    items: Vec<MultiAgentBatch>,
    rng: ChaCha8Rng,
}

impl LocalShuffleBuffer {
    pub fn new(min_steps: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            min_steps,
            buffered_steps: 0,
            items: Vec::new(),
            rng,
        }
    }

    /// True while more input should be pulled before releasing a batch
    pub fn needs_more(&self) -> bool {
        self.items.is_empty() || self.buffered_steps < self.min_steps
    }

    pub fn push(&mut self, batch: MultiAgentBatch) {
        // Batches whose modules were all filtered out still count as one
        // step so an all-filtered stream cannot stall the buffer
        self.buffered_steps += batch.env_steps().max(1);
        self.items.push(batch);
    }

    /// Remove a uniformly chosen batch
    pub fn pop(&mut self) -> Option<MultiAgentBatch> {
        if self.items.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.items.len());
        let batch = self.items.swap_remove(idx);
        self.buffered_steps = self.buffered_steps.saturating_sub(batch.env_steps().max(1));
        Some(batch)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
