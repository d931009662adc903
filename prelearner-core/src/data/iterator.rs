//! Batch iterators over a mapped dataset
//!
//! Forward-only: once exhausted an iterator stays exhausted, a new one
//! must be built to read the data again.

use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::pipeline::{Delivery, PipelineStart};
use super::shuffle::LocalShuffleBuffer;
use crate::batch::MultiAgentBatch;
use crate::error::{PrelearnerError, Result};
use crate::runtime::ShutdownSignal;

/// Options of an output iterator
#[derive(Debug, Clone)]
pub struct IterOptions {
    /// Output batches buffered ahead of the consumer
    pub prefetch_batches: usize,
    /// Environment steps held for local shuffling; `None` keeps arrival order
    pub local_shuffle_buffer_size: Option<usize>,
    pub local_shuffle_seed: Option<u64>,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            prefetch_batches: 2,
            local_shuffle_buffer_size: None,
            local_shuffle_seed: None,
        }
    }
}

/// Lazy iterator of module-keyed batches
///
/// The pipeline behind it starts on the first call to [`next_batch`].
///
/// [`next_batch`]: BatchIterator::next_batch
pub struct BatchIterator {
    start: Arc<PipelineStart>,
    receiver: mpsc::Receiver<Delivery>,
    shuffle: Option<LocalShuffleBuffer>,
    shutdown: ShutdownSignal,
    split_index: usize,
    upstream_done: bool,
    batches_yielded: u64,
}

impl BatchIterator {
    pub(crate) fn new(
        start: Arc<PipelineStart>,
        receiver: mpsc::Receiver<Delivery>,
        shuffle_steps: Option<usize>,
        seed: Option<u64>,
        shutdown: ShutdownSignal,
        split_index: usize,
    ) -> Self {
        Self {
            start,
            receiver,
            shuffle: shuffle_steps
                .filter(|&steps| steps > 0)
                .map(|steps| LocalShuffleBuffer::new(steps as u64, seed)),
            shutdown,
            split_index,
            upstream_done: false,
            batches_yielded: 0,
        }
    }

    /// Get the next batch.
    ///
    /// Returns `DataExhausted` after the last batch, `Cancelled` once the
    /// owning shutdown signal fired, and the first worker error otherwise.
    pub async fn next_batch(&mut self) -> Result<MultiAgentBatch> {
        if self.shutdown.is_shutdown() {
            return Err(PrelearnerError::Cancelled);
        }
        self.start.ensure_started();

        let next = if self.shuffle.is_none() {
            self.recv().await?
        } else {
            while self.shuffle.as_ref().is_some_and(|s| s.needs_more()) {
                match self.recv().await? {
                    Some(batch) => {
                        if let Some(shuffle) = self.shuffle.as_mut() {
                            shuffle.push(batch);
                        }
                    }
                    None => break,
                }
            }
            self.shuffle.as_mut().and_then(|s| s.pop())
        };

        match next {
            Some(batch) => {
                self.batches_yielded += 1;
                Ok(batch)
            }
            None => {
                debug!(
                    "Split {} exhausted after {} batches",
                    self.split_index, self.batches_yielded
                );
                Err(PrelearnerError::DataExhausted)
            }
        }
    }

    async fn recv(&mut self) -> Result<Option<MultiAgentBatch>> {
        if self.upstream_done {
            return Ok(None);
        }
        let shutdown = self.shutdown.clone();
        let delivery = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(PrelearnerError::Cancelled),
            delivery = self.receiver.recv() => delivery,
        };
        match delivery {
            Some(delivery) => delivery.result.map(Some),
            None => {
                self.upstream_done = true;
                Ok(None)
            }
        }
    }

    /// Index of this iterator among its siblings (0 for `iter_batches`)
    pub fn split_index(&self) -> usize {
        self.split_index
    }

    pub fn batches_yielded(&self) -> u64 {
        self.batches_yielded
    }

    /// True once the first pull started the pipeline
    pub fn is_started(&self) -> bool {
        self.start.is_started()
    }

    /// Adapt into a stream that ends at exhaustion and yields errors
    pub fn into_stream(self) -> impl Stream<Item = Result<MultiAgentBatch>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut iterator = state?;
            match iterator.next_batch().await {
                Err(PrelearnerError::DataExhausted) => None,
                // An error ends the stream after it is reported
                Err(e) => Some((Err(e), None)),
                Ok(batch) => Some((Ok(batch), Some(iterator))),
            }
        })
    }
}

impl std::fmt::Debug for BatchIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIterator")
            .field("split_index", &self.split_index)
            .field("started", &self.is_started())
            .field("shuffled", &self.shuffle.is_some())
            .field("batches_yielded", &self.batches_yielded)
            .finish()
    }
}

/// Shareable handle to one iterator; clones pull from the same sequence
#[derive(Clone, Debug)]
pub struct DataIterator {
    inner: Arc<tokio::sync::Mutex<BatchIterator>>,
}

impl DataIterator {
    pub fn new(iterator: BatchIterator) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(iterator)),
        }
    }

    pub async fn next_batch(&self) -> Result<MultiAgentBatch> {
        self.inner.lock().await.next_batch().await
    }

    /// True when both handles share the same underlying iterator
    pub fn same_as(&self, other: &DataIterator) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<BatchIterator> for DataIterator {
    fn from(iterator: BatchIterator) -> Self {
        Self::new(iterator)
    }
}
