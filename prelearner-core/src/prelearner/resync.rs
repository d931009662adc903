//! Periodic module state refresh for remote-bound units
//!
//! Every `period` invocations a state request is issued in the
//! background. Invocations poll it without blocking and swap the module
//! state once it has arrived.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::Result;
use crate::learner::{ModelSnapshot, RemoteLearner, RlModule, COMPONENT_RL_MODULE};

/// Background resync state of one transform unit
pub struct ModuleResync {
    period: u64,
    since_last_update: u64,
    pending: Option<oneshot::Receiver<Result<ModelSnapshot>>>,
}

impl ModuleResync {
    /// `period` of 0 is treated as 1
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
            since_last_update: 0,
            pending: None,
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Count one invocation: install a snapshot that has arrived, then
    /// issue a new request if the period elapsed. Returns true when the
    /// module state was replaced.
    pub fn tick(&mut self, learner: &Arc<dyn RemoteLearner>, module: &mut dyn RlModule) -> bool {
        self.since_last_update += 1;
        let swapped = self.poll(module);

        if self.pending.is_none() && self.since_last_update >= self.period {
            self.since_last_update = 0;
            self.request(learner);
        }
        swapped
    }

    fn poll(&mut self, module: &mut dyn RlModule) -> bool {
        let Some(receiver) = self.pending.as_mut() else {
            return false;
        };
        let received = match receiver.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => return false,
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("Module state request dropped before completing");
                None
            }
            Ok(result) => Some(result),
        };
        self.pending = None;

        match received {
            Some(Ok(state)) => {
                if state == module.get_state() {
                    debug!("Resynced module state unchanged ({} bytes)", state.size());
                    return false;
                }
                match module.set_state(&state) {
                    Ok(()) => {
                        debug!(
                            "Swapped module state (crc32c={:08x}, {} bytes)",
                            state.checksum(),
                            state.size()
                        );
                        true
                    }
                    Err(e) => {
                        warn!("Failed to install resynced module state: {}", e);
                        false
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Module state resync failed, keeping current state: {}", e);
                false
            }
            None => false,
        }
    }

    fn request(&mut self, learner: &Arc<dyn RemoteLearner>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime available, skipping module state resync");
            return;
        };
        let (sender, receiver) = oneshot::channel();
        let learner = learner.clone();
        handle.spawn(async move {
            let result = learner.get_state(COMPONENT_RL_MODULE).await;
            let _ = sender.send(result);
        });
        self.pending = Some(receiver);
        debug!("Requested module state resync");
    }
}
