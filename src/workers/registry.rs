//! Keyed singleton table of background workers.
//!
//! Rules:
//! - one slot per [`WorkerIdentity`]; a second start is a typed failure
//! - the registry owns the run task (JoinHandle + CancellationToken)
//! - stopping is pre-stop hook → cancel → join → remove
//! - a second release of a stopping worker waits for the first to finish,
//!   except when issued from that worker's own pre-stop hook
//! - a worker whose `run` returned on its own is reaped by the next acquire

use super::identity::WorkerIdentity;
use super::traits::Worker;
use crate::error::RuntimeError;
use crate::util::panic_message;
use futures_util::FutureExt;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What `acquire` does when the identity is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Hand back the live worker.
    ReuseExisting,
    /// Fail with [`RuntimeError::AlreadyRunning`].
    FailIfRunning,
}

tokio::task_local! {
    /// Identity whose pre-stop hook is running on the current task.
    static IN_PRE_STOP: WorkerIdentity;
}

struct Slot {
    /// Distinguishes a replacement from the slot a release started on.
    id: u64,
    worker: Arc<dyn Worker>,
    any: Arc<dyn Any + Send + Sync>,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
    stopping: bool,
    /// Taken by the release that does the stopping; flips to `true` once
    /// `run` has returned and the slot is gone.
    stopped_tx: Option<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.stopping && self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

pub struct WorkerRegistry {
    slots: RwLock<HashMap<WorkerIdentity, Slot>>,
    next_id: AtomicU64,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the worker for `identity`, constructing and starting it with
    /// `make` when none is live. Construction and registration happen under
    /// the table lock; `run` executes on its own tokio task.
    pub fn acquire<W, F>(
        &self,
        identity: WorkerIdentity,
        policy: AcquirePolicy,
        make: F,
    ) -> Result<Arc<W>, RuntimeError>
    where
        W: Worker,
        F: FnOnce() -> W,
    {
        let mut slots = self.slots.write();

        if let Some(slot) = slots.get(&identity) {
            let ended_on_its_own =
                !slot.stopping && slot.join.as_ref().is_none_or(JoinHandle::is_finished);
            if ended_on_its_own {
                debug!(worker = %identity, "reaping finished worker");
                slots.remove(&identity);
            } else if slot.stopping || policy == AcquirePolicy::FailIfRunning {
                return Err(RuntimeError::AlreadyRunning(identity));
            } else {
                return Arc::clone(&slot.any)
                    .downcast::<W>()
                    .map_err(|_| RuntimeError::WorkerTypeMismatch(identity));
            }
        }

        let worker = Arc::new(make());
        let token = CancellationToken::new();
        let join = spawn_run(identity, Arc::clone(&worker) as Arc<dyn Worker>, token.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (stopped_tx, stopped) = watch::channel(false);
        slots.insert(
            identity,
            Slot {
                id,
                worker: Arc::clone(&worker) as Arc<dyn Worker>,
                any: Arc::clone(&worker) as Arc<dyn Any + Send + Sync>,
                token,
                join: Some(join),
                stopping: false,
                stopped_tx: Some(stopped_tx),
                stopped,
            },
        );
        info!(worker = %identity, "worker started");
        Ok(worker)
    }

    /// The live worker for `identity`, if any. Never creates one.
    pub fn lookup<W: Worker>(&self, identity: WorkerIdentity) -> Option<Arc<W>> {
        let slots = self.slots.read();
        let slot = slots.get(&identity).filter(|s| s.is_live())?;
        Arc::clone(&slot.any).downcast::<W>().ok()
    }

    pub fn is_running(&self, identity: WorkerIdentity) -> bool {
        self.slots.read().get(&identity).is_some_and(Slot::is_live)
    }

    /// Live identities, sorted.
    pub fn running(&self) -> Vec<WorkerIdentity> {
        let mut ids: Vec<_> = self
            .slots
            .read()
            .iter()
            .filter(|(_, s)| s.is_live())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Stops the worker: pre-stop hook, cancel, wait for `run` to return,
    /// remove the slot. If another release is already stopping the worker
    /// this waits for it; from inside the worker's own pre-stop hook it
    /// returns at once.
    pub async fn release(&self, identity: WorkerIdentity) -> Result<(), RuntimeError> {
        let claimed = {
            let mut slots = self.slots.write();
            let Some(slot) = slots.get_mut(&identity) else {
                return Err(RuntimeError::NotFound(identity.to_string()));
            };
            if slot.stopping {
                Err(slot.stopped.clone())
            } else {
                slot.stopping = true;
                Ok((
                    slot.id,
                    Arc::clone(&slot.worker),
                    slot.token.clone(),
                    slot.join.take(),
                    slot.stopped_tx.take(),
                ))
            }
        };
        let (id, worker, token, join, stopped_tx) = match claimed {
            Ok(parts) => parts,
            Err(mut stopped) => {
                if IN_PRE_STOP.try_with(|current| *current == identity).unwrap_or(false) {
                    return Ok(());
                }
                debug!(worker = %identity, "waiting for release in progress");
                // An error means the stopping release was dropped midway.
                let _ = stopped.wait_for(|done| *done).await;
                return Ok(());
            }
        };

        debug!(worker = %identity, "stopping worker");
        let pre_stop = AssertUnwindSafe(worker.on_pre_stop()).catch_unwind();
        if let Err(payload) = IN_PRE_STOP.scope(identity, pre_stop).await {
            error!(worker = %identity, "pre-stop hook panicked: {}", panic_message(&*payload));
        }
        token.cancel();
        if let Some(join) = join {
            if let Err(e) = join.await {
                error!(worker = %identity, "worker task ended abnormally: {e}");
            }
        }

        let mut slots = self.slots.write();
        if slots.get(&identity).is_some_and(|s| s.id == id) {
            slots.remove(&identity);
        }
        drop(slots);
        if let Some(tx) = stopped_tx {
            tx.send_replace(true);
        }
        info!(worker = %identity, "worker stopped");
        Ok(())
    }

    /// Releases every worker in parallel and waits for all of them,
    /// including ones another caller had already started stopping.
    pub async fn shutdown_all(&self) {
        let identities: Vec<WorkerIdentity> = self.slots.read().keys().copied().collect();
        if identities.is_empty() {
            return;
        }
        info!("Stopping {} workers", identities.len());
        let results = join_all(identities.iter().map(|id| self.release(*id))).await;
        for (identity, result) in identities.iter().zip(results) {
            if let Err(e) = result {
                debug!(worker = %identity, "release during shutdown: {e}");
            }
        }
    }
}

fn spawn_run(
    identity: WorkerIdentity,
    worker: Arc<dyn Worker>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(worker.run(token.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) if token.is_cancelled() => debug!(worker = %identity, "worker run returned"),
            Ok(Ok(())) => info!(worker = %identity, "worker ended before stop"),
            Ok(Err(e)) => warn!(worker = %identity, "worker failed: {e:#}"),
            Err(payload) => {
                error!(worker = %identity, "worker panicked: {}", panic_message(&*payload));
            }
        }
    })
}
