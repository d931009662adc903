//! Map stage execution
//!
//! Rows are re-batched by a feeder task, transformed by `concurrency`
//! worker tasks (each owning one transform unit) and routed to one or
//! more output channels. Nothing runs until an output is first pulled.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tracing::{debug, warn};

use super::backpressure::{BackpressureController, BackpressurePermit};
use super::dataset::Dataset;
use super::iterator::{BatchIterator, IterOptions};
use super::split::SplitRouter;
use crate::batch::{ColumnarBatch, MultiAgentBatch};
use crate::error::{PrelearnerError, Result};
use crate::learner::{LocalityHint, NodeId};
use crate::prelearner::{OfflinePreLearner, PreLearnerOutput};
use crate::runtime::{ShutdownSignal, WorkerContext};

/// A transform applied to every raw batch by a map worker
pub trait BatchMapper: Send {
    fn call(&mut self, batch: &ColumnarBatch) -> Result<PreLearnerOutput>;
}

impl BatchMapper for OfflinePreLearner {
    fn call(&mut self, batch: &ColumnarBatch) -> Result<PreLearnerOutput> {
        OfflinePreLearner::call(self, batch)
    }
}

/// Builds one mapper per worker
pub type MapperFactory = Arc<dyn Fn(WorkerContext) -> Result<Box<dyn BatchMapper>> + Send + Sync>;

/// Options of the map stage
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Number of worker tasks, each with its own transform unit
    pub concurrency: usize,
    /// Rows per transform call; the last batch may be shorter
    pub batch_size: usize,
    /// Hand blocks that already have `batch_size` rows to workers without copying
    pub zero_copy_batch: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            batch_size: 256,
            zero_copy_batch: false,
        }
    }
}

/// A dataset with a pending map stage
#[derive(Clone)]
pub struct MappedDataset {
    source: Dataset,
    factory: MapperFactory,
    options: MapOptions,
}

impl MappedDataset {
    pub(crate) fn new(source: Dataset, factory: MapperFactory, options: MapOptions) -> Self {
        Self {
            source,
            factory,
            options,
        }
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    /// A single lazy iterator over all mapped batches
    pub fn iter_batches(&self, options: IterOptions) -> BatchIterator {
        let router = SplitRouter::new(1, true, None);
        let mut iterators = self.launch(router, &options);
        iterators.remove(0)
    }

    /// `n` iterators sharing one map stage. With `equal` set, batches are
    /// dealt round-robin; otherwise each batch prefers the split whose
    /// hint node produced it.
    pub fn streaming_split(
        &self,
        n: usize,
        equal: bool,
        locality_hints: Option<&[LocalityHint]>,
        options: IterOptions,
    ) -> Vec<BatchIterator> {
        let router = SplitRouter::new(n.max(1), equal, locality_hints);
        self.launch(router, &options)
    }

    fn launch(&self, router: SplitRouter, options: &IterOptions) -> Vec<BatchIterator> {
        let capacity = options.prefetch_batches.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..router.num_splits())
            .map(|_| mpsc::channel::<Delivery>(capacity))
            .unzip();

        let start = Arc::new(PipelineStart {
            pending: Mutex::new(Some(Launch {
                source: self.source.clone(),
                factory: self.factory.clone(),
                options: self.options.clone(),
                router,
                senders,
            })),
        });

        let shutdown = self.source.execution().shutdown.clone();
        let seed = options.local_shuffle_seed.or(self.source.execution().seed);
        receivers
            .into_iter()
            .enumerate()
            .map(|(i, receiver)| {
                BatchIterator::new(
                    start.clone(),
                    receiver,
                    options.local_shuffle_buffer_size,
                    seed.map(|s| s.wrapping_add(i as u64)),
                    shutdown.clone(),
                    i,
                )
            })
            .collect()
    }
}

/// Output of one transform call on its way to a consumer
pub(crate) struct Delivery {
    pub(crate) result: Result<MultiAgentBatch>,
    _permit: Option<BackpressurePermit>,
}

/// Starts the map stage on first use, shared by all outputs
pub(crate) struct PipelineStart {
    pending: Mutex<Option<Launch>>,
}

impl PipelineStart {
    /// Spawn the pipeline tasks if this is the first call.
    /// Must run inside a Tokio runtime.
    pub(crate) fn ensure_started(&self) {
        let launch = self.pending.lock().take();
        if let Some(launch) = launch {
            launch.spawn();
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.pending.lock().is_none()
    }
}

struct Launch {
    source: Dataset,
    factory: MapperFactory,
    options: MapOptions,
    router: SplitRouter,
    senders: Vec<mpsc::Sender<Delivery>>,
}

/// A raw batch handed to a worker
struct Work {
    batch: Result<Arc<ColumnarBatch>>,
    permit: BackpressurePermit,
}

/// A worker result tagged with the producing node
struct Produced {
    node: NodeId,
    result: Result<MultiAgentBatch>,
    permit: Option<BackpressurePermit>,
}

impl Launch {
    fn spawn(self) {
        let Launch {
            source,
            factory,
            options,
            router,
            senders,
        } = self;
        let execution = source.execution().clone();
        let concurrency = options.concurrency.max(1);
        let abort = ShutdownSignal::new();

        let queued: usize = senders.iter().map(|s| s.max_capacity()).sum();
        let backpressure = BackpressureController::new(concurrency + queued);

        debug!(
            "Starting map stage: {} blocks, {} workers, batch_size={}, {} outputs",
            source.num_blocks(),
            concurrency,
            options.batch_size,
            senders.len()
        );

        let (work_tx, work_rx) = mpsc::channel::<Work>(concurrency);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let (out_tx, out_rx) = mpsc::channel::<Produced>(concurrency);

        let stop = Stop {
            abort: abort.clone(),
            shutdown: execution.shutdown.clone(),
        };

        tokio::spawn(feed(
            source.blocks().to_vec(),
            options.batch_size,
            options.zero_copy_batch,
            work_tx,
            backpressure.clone(),
            stop.clone(),
        ));

        for index in 0..concurrency {
            tokio::spawn(run_worker(
                factory.clone(),
                execution.worker_context(index),
                work_rx.clone(),
                out_tx.clone(),
                stop.clone(),
            ));
        }
        drop(out_tx);

        tokio::spawn(route(out_rx, senders, router, stop, backpressure));
    }
}

/// Either signal stops the pipeline: `abort` on a worker failure,
/// `shutdown` when the owner cancels everything
#[derive(Clone)]
struct Stop {
    abort: ShutdownSignal,
    shutdown: ShutdownSignal,
}

impl Stop {
    async fn stopped(&self) {
        tokio::select! {
            _ = self.abort.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Cuts a stream of blocks into batches of exactly `batch_size` rows
struct Rebatcher {
    batch_size: usize,
    zero_copy: bool,
    carry: Option<ColumnarBatch>,
}

impl Rebatcher {
    fn new(batch_size: usize, zero_copy: bool) -> Self {
        Self {
            batch_size: batch_size.max(1),
            zero_copy,
            carry: None,
        }
    }

    fn push(&mut self, block: Arc<ColumnarBatch>) -> Result<Vec<Arc<ColumnarBatch>>> {
        if self.zero_copy && self.carry.is_none() && block.num_rows() == self.batch_size {
            return Ok(vec![block]);
        }

        let combined = match self.carry.take() {
            Some(carry) => ColumnarBatch::concat(&[&carry, block.as_ref()])?,
            None => block.as_ref().clone(),
        };

        let mut out = Vec::new();
        let mut start = 0;
        while combined.num_rows() - start >= self.batch_size {
            out.push(Arc::new(combined.slice(start, self.batch_size)));
            start += self.batch_size;
        }
        if start < combined.num_rows() {
            self.carry = Some(combined.slice(start, combined.num_rows() - start));
        }
        Ok(out)
    }

    fn finish(&mut self) -> Option<Arc<ColumnarBatch>> {
        self.carry.take().filter(|c| !c.is_empty()).map(Arc::new)
    }
}

async fn feed(
    blocks: Vec<Arc<ColumnarBatch>>,
    batch_size: usize,
    zero_copy: bool,
    work: mpsc::Sender<Work>,
    backpressure: BackpressureController,
    stop: Stop,
) {
    let mut rebatcher = Rebatcher::new(batch_size, zero_copy);
    let mut dispatched = 0usize;

    for block in blocks {
        match rebatcher.push(block) {
            Ok(batches) => {
                for batch in batches {
                    if !dispatch(&work, &backpressure, &stop, Ok(batch)).await {
                        return;
                    }
                    dispatched += 1;
                }
            }
            Err(e) => {
                dispatch(&work, &backpressure, &stop, Err(e)).await;
                return;
            }
        }
    }
    if let Some(rest) = rebatcher.finish() {
        if !dispatch(&work, &backpressure, &stop, Ok(rest)).await {
            return;
        }
        dispatched += 1;
    }
    debug!("Feeder finished after {} batches", dispatched);
}

async fn dispatch(
    work: &mpsc::Sender<Work>,
    backpressure: &BackpressureController,
    stop: &Stop,
    batch: Result<Arc<ColumnarBatch>>,
) -> bool {
    let permit = tokio::select! {
        biased;
        _ = stop.stopped() => return false,
        permit = backpressure.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
    };
    work.send(Work { batch, permit }).await.is_ok()
}

async fn run_worker(
    factory: MapperFactory,
    context: WorkerContext,
    work: Arc<tokio::sync::Mutex<mpsc::Receiver<Work>>>,
    out: mpsc::Sender<Produced>,
    stop: Stop,
) {
    let node = context.node_id.clone();
    let index = context.worker_index;

    let mut mapper = match factory(context) {
        Ok(mapper) => mapper,
        Err(e) => {
            warn!("Worker {} on node {} failed to start: {}", index, node, e);
            stop.abort.shutdown();
            let _ = out
                .send(Produced {
                    node,
                    result: Err(e),
                    permit: None,
                })
                .await;
            return;
        }
    };

    let mut processed = 0u64;
    loop {
        let next = {
            let mut receiver = work.lock().await;
            tokio::select! {
                biased;
                _ = stop.stopped() => None,
                item = receiver.recv() => item,
            }
        };
        let Some(Work { batch, permit }) = next else {
            break;
        };

        let result = batch.and_then(|batch| mapper.call(&batch)).and_then(|output| {
            output.into_batch().ok_or_else(|| PrelearnerError::Internal {
                message: "transform unit returned no batch".into(),
            })
        });

        let failed = match &result {
            Ok(_) => {
                processed += 1;
                false
            }
            Err(e) => {
                warn!("Worker {} on node {} failed: {}", index, node, e);
                true
            }
        };

        let delivered = out
            .send(Produced {
                node: node.clone(),
                result,
                permit: Some(permit),
            })
            .await
            .is_ok();
        if failed {
            stop.abort.shutdown();
        }
        if failed || !delivered {
            break;
        }
    }
    debug!("Worker {} on node {} done after {} batches", index, node, processed);
}

async fn route(
    mut produced: mpsc::Receiver<Produced>,
    senders: Vec<mpsc::Sender<Delivery>>,
    mut router: SplitRouter,
    stop: Stop,
    backpressure: BackpressureController,
) {
    let mut open = vec![true; senders.len()];
    let equal = senders.len() == 1 || router.is_equal();

    loop {
        let next = tokio::select! {
            item = produced.recv() => item,
            _ = stop.shutdown.cancelled() => None,
        };
        let Some(Produced { node, result, permit }) = next else {
            break;
        };

        let loads: Vec<Option<usize>> = senders
            .iter()
            .zip(&open)
            .map(|(s, &o)| o.then(|| s.max_capacity() - s.capacity()))
            .collect();
        let order = router.route(&node, &loads);
        if order.is_empty() {
            debug!("All consumers gone, stopping router");
            break;
        }

        match result {
            Ok(batch) => {
                let delivery = Delivery {
                    result: Ok(batch),
                    _permit: permit,
                };
                if !deliver(&senders, &mut open, &order, equal, delivery).await {
                    break;
                }
            }
            Err(e) => {
                // Fatal: the first consumer gets the error, the others learn
                // that the shared pipeline stopped
                let reason = e.to_string();
                let mut first = Some(e);
                for &i in &order {
                    let error = first.take().unwrap_or_else(|| PrelearnerError::Pipeline {
                        reason: format!("pipeline aborted: {}", reason),
                    });
                    let _ = senders[i]
                        .send(Delivery {
                            result: Err(error),
                            _permit: None,
                        })
                        .await;
                }
                break;
            }
        }
    }
    backpressure.close();
}

async fn deliver(
    senders: &[mpsc::Sender<Delivery>],
    open: &mut [bool],
    order: &[usize],
    equal: bool,
    mut delivery: Delivery,
) -> bool {
    if !equal {
        for &i in order {
            match senders[i].try_send(delivery) {
                Ok(()) => return true,
                Err(TrySendError::Full(d)) => delivery = d,
                Err(TrySendError::Closed(d)) => {
                    open[i] = false;
                    delivery = d;
                }
            }
        }
    }
    for &i in order {
        if !open[i] {
            continue;
        }
        match senders[i].send(delivery).await {
            Ok(()) => return true,
            Err(SendError(d)) => {
                open[i] = false;
                delivery = d;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;

    fn block(start: i64, rows: i64) -> Arc<ColumnarBatch> {
        let column = (start..start + rows).map(Value::Int).collect();
        Arc::new(ColumnarBatch::from_columns([("x", column)]).unwrap())
    }

    #[test]
    fn test_rebatcher_carries_rows_across_blocks() {
        let mut rebatcher = Rebatcher::new(3, false);
        assert!(rebatcher.push(block(0, 2)).unwrap().is_empty());
        let out = rebatcher.push(block(2, 5)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].get("x", 0), Some(&Value::Int(3)));
        let rest = rebatcher.finish().unwrap();
        assert_eq!(rest.num_rows(), 1);
        assert_eq!(rest.get("x", 0), Some(&Value::Int(6)));
        assert!(rebatcher.finish().is_none());
    }

    #[test]
    fn test_zero_copy_passes_exact_blocks() {
        let mut rebatcher = Rebatcher::new(4, true);
        let original = block(0, 4);
        let out = rebatcher.push(original.clone()).unwrap();
        assert!(Arc::ptr_eq(&out[0], &original));

        let mut copying = Rebatcher::new(4, false);
        let out = copying.push(original.clone()).unwrap();
        assert!(!Arc::ptr_eq(&out[0], &original));
        assert_eq!(out[0].as_ref(), original.as_ref());
    }
}
