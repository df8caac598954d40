//! Broadcast rounds over the task tracker.
//!
//! A round snapshots the observer list, submits one task per observer from
//! the most recently registered to the oldest, and waits for all of them.
//! Removals requested while any round is in flight are applied once the
//! last round finishes, so an observer never disappears mid-round.

use super::observers::FnObserver;
use super::traits::{Observer, Verdict};
use crate::event::InboundEvent;
use crate::tasks::TaskTracker;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Task label shared by every observer invocation.
pub const BROADCAST_LABEL: &str = "@broadcast";

/// Returned by registration; used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(u64);

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

struct ObserverEntry {
    token: ObserverToken,
    observer: Arc<dyn Observer>,
}

#[derive(Default)]
struct State {
    entries: Vec<ObserverEntry>,
    rounds_in_flight: usize,
    deferred: HashSet<ObserverToken>,
}

impl State {
    fn remove_now(&mut self, token: ObserverToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.token != token);
        self.entries.len() != before
    }

    fn apply_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let deferred = std::mem::take(&mut self.deferred);
        self.entries.retain(|e| !deferred.contains(&e.token));
        debug!(removed = deferred.len(), "deferred observer removals applied");
    }
}

pub struct BroadcastDispatcher {
    state: Mutex<State>,
    next_token: AtomicU64,
    tasks: Arc<TaskTracker>,
}

impl BroadcastDispatcher {
    pub fn new(tasks: Arc<TaskTracker>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_token: AtomicU64::new(1),
            tasks,
        }
    }

    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverToken {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        debug!(observer = observer.name(), %token, "observer registered");
        self.state.lock().entries.push(ObserverEntry { token, observer });
        token
    }

    /// Registers a synchronous callback.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F) -> ObserverToken
    where
        F: Fn(&InboundEvent) -> anyhow::Result<Verdict> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnObserver::new(name, f)))
    }

    /// Removes an observer. While a round is running the removal is
    /// deferred until every round has finished. Returns `false` for an
    /// unknown or already removed token.
    pub fn deregister(&self, token: ObserverToken) -> bool {
        let mut state = self.state.lock();
        if state.rounds_in_flight == 0 {
            return state.remove_now(token);
        }
        let known = state.entries.iter().any(|e| e.token == token);
        known && state.deferred.insert(token)
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|e| !state.deferred.contains(&e.token))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one round for `event` and waits for every observer.
    ///
    /// Observers are submitted newest first, so the pool dequeues them in
    /// that order. With more than one pool worker an older observer can
    /// still start, or finish, before a newer one; only a single-worker
    /// pool runs them strictly newest first.
    pub async fn dispatch(&self, event: &InboundEvent) {
        let Some(round) = RoundGuard::begin(self) else {
            return;
        };
        let event = Arc::new(event.clone());

        let mut pending = Vec::with_capacity(round.snapshot.len());
        for (token, observer) in round.snapshot.iter().rev() {
            let observer = Arc::clone(observer);
            let event = Arc::clone(&event);
            let submitted = self.tasks.submit(BROADCAST_LABEL, async move {
                observer.on_event(&event).await
            });
            match submitted {
                Ok(task) => pending.push((*token, task)),
                Err(e) => {
                    debug!(%token, "observer skipped: {e}");
                }
            }
        }

        let (tokens, tasks): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let results = join_all(tasks.into_iter().map(|task| task.wait())).await;

        let mut leaving = Vec::new();
        for (token, result) in tokens.into_iter().zip(results) {
            match result {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Deregister) => leaving.push(token),
                Err(e) => {
                    let name = round.name_of(token);
                    warn!(observer = name, %token, "observer failed, keeping it: {e}");
                }
            }
        }
        if !leaving.is_empty() {
            self.state.lock().deferred.extend(leaving);
        }
    }
}

/// Marks a round in flight; dropping it ends the round and applies the
/// deferred removals when it was the last one.
struct RoundGuard<'a> {
    dispatcher: &'a BroadcastDispatcher,
    snapshot: Vec<(ObserverToken, Arc<dyn Observer>)>,
}

impl<'a> RoundGuard<'a> {
    fn begin(dispatcher: &'a BroadcastDispatcher) -> Option<Self> {
        let mut state = dispatcher.state.lock();
        let snapshot: Vec<_> = state
            .entries
            .iter()
            .filter(|e| !state.deferred.contains(&e.token))
            .map(|e| (e.token, Arc::clone(&e.observer)))
            .collect();
        if snapshot.is_empty() {
            return None;
        }
        state.rounds_in_flight += 1;
        Some(Self {
            dispatcher,
            snapshot,
        })
    }

    fn name_of(&self, token: ObserverToken) -> &str {
        self.snapshot
            .iter()
            .find(|(t, _)| *t == token)
            .map_or("?", |(_, o)| o.name())
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.dispatcher.state.lock();
        state.rounds_in_flight -= 1;
        if state.rounds_in_flight == 0 {
            state.apply_deferred();
        }
    }
}
