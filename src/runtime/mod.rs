//! Owns the registries and routes inbound events through them.

use crate::auth::{AccessLevel, Authorizer};
use crate::broadcast::BroadcastDispatcher;
use crate::channels::ReplySink;
use crate::commands::{DynamicUnitLoader, LoadReport, PluginRegistry, builtin};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::event::InboundEvent;
use crate::tasks::{PendingTask, TaskTracker};
use crate::workers::WorkerRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub struct BotRuntime {
    config: Config,
    tasks: Arc<TaskTracker>,
    workers: Arc<WorkerRegistry>,
    plugins: Arc<PluginRegistry>,
    broadcast: Arc<BroadcastDispatcher>,
    closed: AtomicBool,
}

impl BotRuntime {
    /// Builds the task pool, worker registry, command registry and
    /// broadcast dispatcher, in that order. Must be called inside a tokio
    /// runtime.
    pub fn new(
        config: Config,
        loader: Arc<dyn DynamicUnitLoader>,
        reply: Arc<dyn ReplySink>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let tasks = Arc::new(TaskTracker::new(config.runtime.worker_threads));
        let workers = Arc::new(WorkerRegistry::new());
        let plugins = Arc::new(PluginRegistry::new(
            loader,
            Arc::clone(&tasks),
            Arc::clone(&workers),
            authorizer,
            reply,
            config.commands.clone(),
        ));
        let broadcast = Arc::new(BroadcastDispatcher::new(Arc::clone(&tasks)));
        info!(workers = tasks.worker_count(), "runtime initialised");
        Self {
            config,
            tasks,
            workers,
            plugins,
            broadcast,
            closed: AtomicBool::new(false),
        }
    }

    /// Registers the compiled-in commands.
    pub fn register_builtins(&self) -> Result<(), RuntimeError> {
        builtin::register_all(&self.plugins, &self.config.timer)
    }

    /// Loads every unit from `runtime.modules_dir`.
    pub async fn load_modules(&self) -> LoadReport {
        self.plugins.load_dir(&self.config.runtime.modules_dir).await
    }

    /// Fans `event` out to the observers and, when it is a command for this
    /// bot, dispatches it. Both happen concurrently; the call returns once
    /// the broadcast round is over and the handler (if any) is queued.
    ///
    /// `Ok(None)` means the event was not a command addressed to this bot.
    pub async fn handle_event(
        &self,
        event: InboundEvent,
    ) -> Result<Option<PendingTask<()>>, RuntimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::Closed);
        }

        let ((), routed) = tokio::join!(self.broadcast.dispatch(&event), self.route(&event));
        routed
    }

    async fn route(&self, event: &InboundEvent) -> Result<Option<PendingTask<()>>, RuntimeError> {
        let Some(command) = event.command() else {
            return Ok(None);
        };
        let bot = self.config.runtime.bot_username.as_deref();
        if !command.addressed_to(bot) {
            debug!(command = %command.name, target = ?command.target, "command for another bot");
            return Ok(None);
        }
        self.plugins
            .dispatch(&command.name, AccessLevel::Public, event.clone())
            .await
            .map(Some)
    }

    /// Tears down in reverse construction order: commands (drained), then
    /// workers, then the task pool. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("runtime shutting down");
        self.plugins.shutdown().await;
        debug!(observers = self.broadcast.len(), "broadcast closed");
        self.workers.shutdown_all().await;
        self.tasks.shutdown().await;
        info!("runtime stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskTracker> {
        &self.tasks
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn broadcast(&self) -> &Arc<BroadcastDispatcher> {
        &self.broadcast
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
