//! Backpressure control for the map stage
//!
//! Bounds the number of raw batches dispatched to transform workers whose
//! output has not been consumed yet.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{PrelearnerError, Result};

/// Semaphore-based limit on in-flight batches
#[derive(Clone)]
pub struct BackpressureController {
    semaphore: Arc<Semaphore>,
    max_pending: usize,
    pending: Arc<AtomicUsize>,
}

impl BackpressureController {
    /// `max_pending` of 0 is treated as 1
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_pending)),
            max_pending,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquire a slot for one dispatched batch (called by the feeder)
    pub async fn acquire(&self) -> Result<BackpressurePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PrelearnerError::Cancelled)?;
        Ok(self.track(permit))
    }

    /// Stop handing out slots; waiting feeders observe cancellation
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> BackpressurePermit {
        self.pending.fetch_add(1, Ordering::Relaxed);
        BackpressurePermit {
            _permit: permit,
            pending: self.pending.clone(),
        }
    }
}

/// Held from dispatch until the consumer receives the batch's output
pub struct BackpressurePermit {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicUsize>,
}

impl Drop for BackpressurePermit {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
