//! Fixed-size async worker pool with per-label bookkeeping.
//!
//! Every submitted job carries a label (the command name for handlers,
//! `@broadcast` for observers). The tracker counts outstanding jobs per
//! label so that [`TaskTracker::drain_label`] can wait for one command's
//! in-flight invocations without stopping anything else.

use crate::error::RuntimeError;
use crate::util::panic_message;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Task identifier, unique per tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The job returned an error.
    #[error("task failed: {0}")]
    Failed(String),
    /// The job panicked; the pool survived.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The job was dropped before it produced a result.
    #[error("task dropped before completion")]
    Dropped,
}

/// Counters exposed by [`TaskTracker::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTrackerStats {
    pub worker_count: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
}

struct QueuedTask {
    id: TaskId,
    label: Arc<str>,
    job: BoxFuture<'static, ()>,
}

struct Shared {
    next_id: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    pending: Mutex<HashMap<Arc<str>, usize>>,
    drained: Notify,
    /// Failures nobody has read through [`PendingTask::wait`] yet.
    unobserved: Mutex<HashMap<TaskId, (Arc<str>, TaskError)>>,
}

impl Shared {
    fn finish(&self, label: &str) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(label) {
            *count -= 1;
            if *count == 0 {
                pending.remove(label);
                self.drained.notify_waiters();
            }
        }
    }
}

/// Decrements the label count when the job completes or is dropped unrun.
struct LabelGuard {
    shared: Arc<Shared>,
    label: Arc<str>,
}

impl Drop for LabelGuard {
    fn drop(&mut self) {
        self.shared.finish(&self.label);
    }
}

/// Handle to one submitted job's eventual result.
pub struct PendingTask<T> {
    id: TaskId,
    label: Arc<str>,
    rx: oneshot::Receiver<Result<T, TaskError>>,
    shared: Arc<Shared>,
}

impl<T> PendingTask<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for the job. Reading a failure here marks it observed, so it
    /// is not reported again at shutdown.
    pub async fn wait(self) -> Result<T, TaskError> {
        let outcome = self.rx.await.unwrap_or(Err(TaskError::Dropped));
        if outcome.is_err() {
            self.shared.unobserved.lock().remove(&self.id);
        }
        outcome
    }
}

impl<T> fmt::Debug for PendingTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Async execution pool: an unbounded queue served by `worker_count` tokio
/// tasks. Must be created inside a tokio runtime.
pub struct TaskTracker {
    worker_count: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<QueuedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl TaskTracker {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<QueuedTask>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            unobserved: Mutex::new(HashMap::new()),
        });

        let workers = (0..worker_count)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        // Holding the receiver lock only while waiting for
                        // the next job lets the other workers run theirs.
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else {
                            debug!(worker = worker_id, "task queue closed, worker exiting");
                            break;
                        };
                        debug!(worker = worker_id, task = %task.id, label = %task.label, "running task");
                        task.job.await;
                    }
                })
            })
            .collect();

        Self {
            worker_count,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shared,
        }
    }

    /// Enqueues `fut` under `label` and returns immediately.
    ///
    /// Errors and panics from `fut` end up in the returned [`PendingTask`].
    pub fn submit<F, T>(&self, label: &str, fut: F) -> Result<PendingTask<T>, RuntimeError>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        // The count goes up under the sender lock, so a concurrent shutdown
        // either sees the job queued or the submit sees `Closed`.
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(RuntimeError::Closed);
        };

        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let label: Arc<str> = Arc::from(label);
        let (result_tx, rx) = oneshot::channel();

        *self
            .shared
            .pending
            .lock()
            .entry(Arc::clone(&label))
            .or_insert(0) += 1;
        // Owned by the job, so dropping it unpolled still releases the count.
        let guard = LabelGuard {
            shared: Arc::clone(&self.shared),
            label: Arc::clone(&label),
        };

        let shared = Arc::clone(&self.shared);
        let job_label = Arc::clone(&label);
        let job = async move {
            let guard = guard;
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(format!("{e:#}"))),
                Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
            };
            match &outcome {
                Ok(_) => {
                    shared.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    shared
                        .unobserved
                        .lock()
                        .insert(id, (Arc::clone(&job_label), e.clone()));
                }
            }
            // Release the label before the waiter can observe the result.
            drop(guard);
            let _ = result_tx.send(outcome);
        }
        .boxed();

        let queued = QueuedTask {
            id,
            label: Arc::clone(&label),
            job,
        };
        if tx.send(queued).is_err() {
            return Err(RuntimeError::Closed);
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        Ok(PendingTask {
            id,
            label,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Outstanding (queued or running) jobs for `label`.
    pub fn pending_count(&self, label: &str) -> usize {
        self.shared.pending.lock().get(label).copied().unwrap_or(0)
    }

    /// Waits until no job labelled `label` is outstanding. Returns at once
    /// when there is none. Calling this from a job with the same label
    /// never returns.
    pub async fn drain_label(&self, label: &str) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending_count(label) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn stats(&self) -> TaskTrackerStats {
        TaskTrackerStats {
            worker_count: self.worker_count,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.shared.pending.lock().values().sum(),
        }
    }

    /// Stops accepting work, lets the pool finish everything already queued,
    /// joins the pool and reports failures nobody observed. Idempotent.
    pub async fn shutdown(&self) {
        let sender = self.tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        if sender.is_none() && workers.is_empty() {
            return;
        }
        drop(sender);

        info!("Shutting down task tracker with {} workers", workers.len());
        for handle in workers {
            if let Err(e) = handle.await {
                error!("task tracker worker ended abnormally: {e}");
            }
        }

        let mut unobserved: Vec<_> = self.shared.unobserved.lock().drain().collect();
        unobserved.sort_by_key(|(id, _)| *id);
        for (id, (label, err)) in unobserved {
            error!(task = %id, label = %label, "unobserved task failure: {err}");
        }
    }
}
