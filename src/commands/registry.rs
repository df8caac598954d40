//! Command table: name → loaded unit, with load / reload / unload / dispatch.
//!
//! Per command the state moves `Loading → Loaded → Unloading → (gone)`, or
//! `Loading → (gone)` when the unit fails validation. Only `Loaded` commands
//! dispatch. Unload drains the command's task label before the unit is
//! closed, and dispatch submits under the table read lock, so a handler is
//! never running once its unit has been closed.
//!
//! `load` and `unload` may be cancelled: a dropped load forgets its
//! `Loading` slot and a dropped unload puts the command back to `Loaded`.

use super::descriptor::{CommandContext, CommandDescriptor};
use super::discovery::{LoadReport, scan_dir};
use super::loader::{DynamicUnitLoader, UnitHandle, command_name_from_path};
use crate::auth::{AccessLevel, AuthDecision, Authorizer};
use crate::channels::ReplySink;
use crate::config::CommandsConfig;
use crate::error::RuntimeError;
use crate::event::InboundEvent;
use crate::tasks::{PendingTask, TaskTracker};
use crate::util::panic_message;
use crate::workers::WorkerRegistry;
use anyhow::{Context, anyhow};
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Loading,
    Loaded,
    Unloading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitSource {
    Native(PathBuf),
    Builtin,
}

struct CommandSlot {
    state: UnitState,
    source: UnitSource,
    handle: Option<UnitHandle>,
    descriptor: Option<Arc<CommandDescriptor>>,
}

type CommandTable = RwLock<HashMap<String, CommandSlot>>;

/// Rolls a slot out of a transitional state when the future driving the
/// transition is dropped before it finishes.
struct Transition<'a> {
    commands: &'a CommandTable,
    name: &'a str,
    state: UnitState,
    armed: bool,
}

impl<'a> Transition<'a> {
    fn begin(commands: &'a CommandTable, name: &'a str, state: UnitState) -> Self {
        Self {
            commands,
            name,
            state,
            armed: true,
        }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut commands = self.commands.write();
        if commands.get(self.name).map(|s| s.state) != Some(self.state) {
            return;
        }
        match self.state {
            UnitState::Loading => {
                commands.remove(self.name);
                debug!(command = %self.name, "load cancelled");
            }
            UnitState::Unloading => {
                if let Some(slot) = commands.get_mut(self.name) {
                    slot.state = UnitState::Loaded;
                }
                debug!(command = %self.name, "unload cancelled");
            }
            UnitState::Loaded => {}
        }
    }
}

/// Entry of the list published to the chat backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
}

pub struct PluginRegistry {
    commands: CommandTable,
    loader: Arc<dyn DynamicUnitLoader>,
    tasks: Arc<TaskTracker>,
    workers: Arc<WorkerRegistry>,
    authorizer: Arc<dyn Authorizer>,
    sink: Arc<dyn ReplySink>,
    settings: CommandsConfig,
}

impl PluginRegistry {
    pub fn new(
        loader: Arc<dyn DynamicUnitLoader>,
        tasks: Arc<TaskTracker>,
        workers: Arc<WorkerRegistry>,
        authorizer: Arc<dyn Authorizer>,
        sink: Arc<dyn ReplySink>,
        settings: CommandsConfig,
    ) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            loader,
            tasks,
            workers,
            authorizer,
            sink,
            settings,
        }
    }

    // ── Loading ──────────────────────────────────────────────────

    /// Loads the unit at `path` and registers the command it provides.
    /// Returns the command name.
    pub async fn load(&self, path: &Path) -> Result<String, RuntimeError> {
        let unit = path.display().to_string();
        let name = command_name_from_path(path).ok_or_else(|| {
            RuntimeError::load_failure(&unit, "file name does not match <prefix>cmd_<name>.<ext>")
        })?;

        {
            let mut commands = self.commands.write();
            if commands.contains_key(&name) {
                return Err(RuntimeError::AlreadyExists(name));
            }
            commands.insert(
                name.clone(),
                CommandSlot {
                    state: UnitState::Loading,
                    source: UnitSource::Native(path.to_path_buf()),
                    handle: None,
                    descriptor: None,
                },
            );
        }
        // The loader thread cannot be stopped; if this future is dropped its
        // result, handle included, is dropped when the thread finishes.
        let transition = Transition::begin(&self.commands, &name, UnitState::Loading);

        let loader = Arc::clone(&self.loader);
        let unit_path = path.to_path_buf();
        let unit_name = name.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            open_and_enter(loader.as_ref(), &unit_path, &unit_name)
        })
        .await
        .map_err(|e| anyhow!("loader thread failed: {e}"))
        .and_then(|r| r);
        transition.finish();

        let mut commands = self.commands.write();
        match outcome {
            Ok((handle, descriptor)) => {
                let Some(slot) = commands.get_mut(&name) else {
                    drop(commands);
                    self.loader.close(handle);
                    return Err(RuntimeError::load_failure(unit, "registration vanished"));
                };
                slot.state = UnitState::Loaded;
                slot.handle = Some(handle);
                slot.descriptor = Some(Arc::new(descriptor));
                info!(command = %name, path = %unit, "command loaded");
                Ok(name)
            }
            Err(e) => {
                commands.remove(&name);
                warn!(command = %name, path = %unit, "failed to load command: {e:#}");
                Err(RuntimeError::load_failure(unit, format!("{e:#}")))
            }
        }
    }

    /// Registers a compiled-in command. It shares the table and dispatch
    /// path with loaded units but has no file behind it.
    pub fn register_builtin(&self, descriptor: CommandDescriptor) -> Result<(), RuntimeError> {
        descriptor
            .validate()
            .map_err(|e| RuntimeError::load_failure(&descriptor.name, format!("{e:#}")))?;
        let name = descriptor.name.clone();
        let mut commands = self.commands.write();
        if commands.contains_key(&name) {
            return Err(RuntimeError::AlreadyExists(name));
        }
        commands.insert(
            name.clone(),
            CommandSlot {
                state: UnitState::Loaded,
                source: UnitSource::Builtin,
                handle: None,
                descriptor: Some(Arc::new(descriptor)),
            },
        );
        debug!(command = %name, "builtin command registered");
        Ok(())
    }

    /// Loads every unit in `dir` in path order. Failures are logged and
    /// reported, never fatal.
    pub async fn load_dir(&self, dir: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        let units = scan_dir(dir);
        if units.is_empty() {
            info!(dir = %dir.display(), "no command units found");
            return report;
        }
        for path in units {
            match self.load(&path).await {
                Ok(name) => report.loaded.push(name),
                Err(e) => report.failed.push((path, e)),
            }
        }
        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "command units loaded"
        );
        report
    }

    // ── Unloading ────────────────────────────────────────────────

    /// Removes `name` after every in-flight invocation of it has finished.
    pub async fn unload(&self, name: &str) -> Result<(), RuntimeError> {
        {
            let mut commands = self.commands.write();
            let slot = commands
                .get_mut(name)
                .filter(|s| s.state == UnitState::Loaded)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            slot.state = UnitState::Unloading;
        }
        let transition = Transition::begin(&self.commands, name, UnitState::Unloading);

        let pending = self.tasks.pending_count(name);
        if pending > 0 {
            debug!(command = %name, pending, "waiting for in-flight invocations");
        }
        self.tasks.drain_label(name).await;
        transition.finish();

        let slot = self.commands.write().remove(name);
        if let Some(CommandSlot {
            handle: Some(handle),
            ..
        }) = slot
        {
            self.loader.close(handle);
        }
        info!(command = %name, "command unloaded");
        Ok(())
    }

    /// Unload followed by a fresh load of the same file. Builtins have no
    /// file and cannot be reloaded.
    pub async fn reload(&self, name: &str) -> Result<(), RuntimeError> {
        let path = {
            let commands = self.commands.read();
            let slot = commands
                .get(name)
                .filter(|s| s.state == UnitState::Loaded)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            match &slot.source {
                UnitSource::Native(path) => path.clone(),
                UnitSource::Builtin => {
                    return Err(RuntimeError::load_failure(
                        name,
                        "builtin commands cannot be reloaded",
                    ));
                }
            }
        };
        self.unload(name).await?;
        self.load(&path).await.map(|_| ())
    }

    /// Unloads every command.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self
            .commands
            .read()
            .iter()
            .filter(|(_, s)| s.state == UnitState::Loaded)
            .map(|(name, _)| name.clone())
            .collect();
        info!("Unloading {} commands", names.len());
        let results = join_all(names.iter().map(|name| self.unload(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                debug!(command = %name, "unload during shutdown: {e}");
            }
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Routes one command event: lookup, authorisation at
    /// `max(access, command level)`, argument contract, then submission to
    /// the task tracker under the command's label. Rejections answer the
    /// sender through the reply sink when they are a known user.
    pub async fn dispatch(
        self: &Arc<Self>,
        name: &str,
        access: AccessLevel,
        event: InboundEvent,
    ) -> Result<PendingTask<()>, RuntimeError> {
        let Some(descriptor) = self.loaded(name) else {
            if self.settings.reply_on_unknown {
                self.answer(&event, &format!("Unknown command: /{name}")).await;
            }
            return Err(RuntimeError::NotFound(name.to_string()));
        };

        let level = access.max(descriptor.access_level());
        if let AuthDecision::Denied(reason) = self.authorizer.authorize(&event, level) {
            debug!(command = %name, %reason, "command denied");
            if self.settings.reply_on_denied {
                self.answer(&event, &format!("You cannot use /{name}: {reason}"))
                    .await;
            }
            return Err(RuntimeError::Unauthorized {
                command: name.to_string(),
                reason,
            });
        }

        let rest = event.command().map(|c| c.rest).unwrap_or_default();
        let args = match descriptor.args.parse(&rest) {
            Ok(args) => args,
            Err(message) => {
                self.answer(&event, &message).await;
                return Err(RuntimeError::ArgumentMismatch {
                    command: name.to_string(),
                    message,
                });
            }
        };

        let ctx = CommandContext {
            command: name.to_string(),
            args,
            sink: Arc::clone(&self.sink),
            workers: Arc::clone(&self.workers),
            registry: Arc::clone(self),
        };
        self.submit_if_current(&descriptor, ctx, event)
    }

    /// Submits the handler only if `descriptor` is still the loaded one.
    /// The read lock is held across the submit so an unload cannot slip
    /// between the check and the label count going up.
    fn submit_if_current(
        &self,
        descriptor: &Arc<CommandDescriptor>,
        ctx: CommandContext,
        event: InboundEvent,
    ) -> Result<PendingTask<()>, RuntimeError> {
        let commands = self.commands.read();
        let current = commands
            .get(&descriptor.name)
            .filter(|s| s.state == UnitState::Loaded)
            .and_then(|s| s.descriptor.as_ref())
            .is_some_and(|d| Arc::ptr_eq(d, descriptor));
        if !current {
            return Err(RuntimeError::NotFound(descriptor.name.clone()));
        }
        let handler = Arc::clone(&descriptor.handler);
        self.tasks
            .submit(&descriptor.name, async move { handler.handle(ctx, event).await })
    }

    async fn answer(&self, event: &InboundEvent, text: &str) {
        if !event.from_known_user() {
            return;
        }
        if let Err(e) = self.sink.reply(event, text).await {
            warn!(chat = event.chat_id, "failed to send reply: {e:#}");
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    fn loaded(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.commands
            .read()
            .get(name)
            .filter(|s| s.state == UnitState::Loaded)
            .and_then(|s| s.descriptor.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded(name).is_some()
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.loaded(name)
    }

    /// Names of all loaded commands, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .iter()
            .filter(|(_, s)| s.state == UnitState::Loaded)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Visible commands sorted by name; restricted ones are marked
    /// ` (Owner)`.
    pub fn command_list(&self) -> Vec<CommandInfo> {
        let commands = self.commands.read();
        let mut list: Vec<CommandInfo> = commands
            .values()
            .filter(|s| s.state == UnitState::Loaded)
            .filter_map(|s| s.descriptor.as_ref())
            .filter(|d| !d.flags.hidden)
            .map(|d| CommandInfo {
                name: d.name.clone(),
                description: if d.flags.restricted {
                    format!("{} (Owner)", d.description)
                } else {
                    d.description.clone()
                },
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// Opens the unit and runs its entry point. The handle is closed again on
/// any failure after opening.
fn open_and_enter(
    loader: &dyn DynamicUnitLoader,
    path: &Path,
    name: &str,
) -> anyhow::Result<(UnitHandle, CommandDescriptor)> {
    let handle = loader.open(path)?;
    match enter(loader, &handle, name) {
        Ok(descriptor) => Ok((handle, descriptor)),
        Err(e) => {
            loader.close(handle);
            Err(e)
        }
    }
}

fn enter(
    loader: &dyn DynamicUnitLoader,
    handle: &UnitHandle,
    name: &str,
) -> anyhow::Result<CommandDescriptor> {
    let entry = loader
        .resolve_entry(handle)
        .context("cannot resolve entry point")?;
    let descriptor = catch_unwind(AssertUnwindSafe(|| entry(name)))
        .map_err(|payload| anyhow!("entry point panicked: {}", panic_message(&*payload)))??
        .ok_or_else(|| anyhow!("entry point refused to load '{name}'"))?;
    if descriptor.name != name {
        anyhow::bail!(
            "unit registers '{}' but its file name provides '{name}'",
            descriptor.name
        );
    }
    descriptor.validate()?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::commands::descriptor::{ArgContract, SplitRule, handler_fn};
    use crate::commands::loader::{EntryFn, unit_file_name};
    use crate::event::Sender;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl ReplySink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn reply(&self, _event: &InboundEvent, text: &str) -> anyhow::Result<()> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    /// Units are named by the file stem; the entry behaviour is picked from
    /// the command name.
    #[derive(Default)]
    struct ScriptedLoader {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl DynamicUnitLoader for ScriptedLoader {
        fn open(&self, path: &Path) -> anyhow::Result<UnitHandle> {
            match command_name_from_path(path).as_deref() {
                Some("unopenable") => anyhow::bail!("not a shared object"),
                Some("slow") => std::thread::sleep(Duration::from_millis(200)),
                _ => {}
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(UnitHandle::new(path, Arc::new(())))
        }

        fn resolve_entry(&self, unit: &UnitHandle) -> anyhow::Result<EntryFn> {
            if command_name_from_path(unit.path()).as_deref() == Some("nosymbol") {
                anyhow::bail!("undefined symbol: loadcmd");
            }
            Ok(Arc::new(|name: &str| -> anyhow::Result<Option<CommandDescriptor>> {
                match name {
                    "refuses" => Ok(None),
                    "panics" => panic!("entry exploded"),
                    "liar" => Ok(Some(CommandDescriptor::new(
                        "other",
                        "wrong name",
                        handler_fn(|_, _| async { anyhow::Ok(()) }),
                    ))),
                    _ => Ok(Some(CommandDescriptor::new(
                        name,
                        "scripted",
                        handler_fn(|_, _| async { anyhow::Ok(()) }),
                    ))),
                }
            }))
        }

        fn close(&self, _unit: UnitHandle) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        registry: Arc<PluginRegistry>,
        loader: Arc<ScriptedLoader>,
        sink: Arc<Recording>,
        tasks: Arc<TaskTracker>,
    }

    fn fixture() -> Fixture {
        let loader = Arc::new(ScriptedLoader::default());
        let sink = Arc::new(Recording::default());
        let tasks = Arc::new(TaskTracker::new(2));
        let registry = Arc::new(PluginRegistry::new(
            Arc::clone(&loader) as Arc<dyn DynamicUnitLoader>,
            Arc::clone(&tasks),
            Arc::new(WorkerRegistry::new()),
            Arc::new(AllowAll),
            Arc::clone(&sink) as Arc<dyn ReplySink>,
            CommandsConfig::default(),
        ));
        Fixture {
            registry,
            loader,
            sink,
            tasks,
        }
    }

    fn unit(name: &str) -> PathBuf {
        PathBuf::from("/modules").join(unit_file_name(name))
    }

    fn user_event(text: &str) -> InboundEvent {
        InboundEvent::text(1, Some(Sender::user(10)), text)
    }

    #[tokio::test]
    async fn load_registers_and_rejects_duplicates() {
        let f = fixture();
        assert_eq!(f.registry.load(&unit("ping")).await.unwrap(), "ping");
        assert!(f.registry.is_loaded("ping"));
        assert_eq!(
            f.registry.load(&unit("ping")).await,
            Err(RuntimeError::AlreadyExists("ping".into()))
        );
        assert_eq!(f.loader.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_loads_release_handle_and_leave_no_entry() {
        let f = fixture();
        for name in ["refuses", "panics", "liar", "nosymbol", "unopenable"] {
            let err = f.registry.load(&unit(name)).await.unwrap_err();
            assert!(
                matches!(err, RuntimeError::LoadFailure { .. }),
                "{name}: {err}"
            );
            assert!(!f.registry.is_loaded(name));
        }
        // Everything opened was closed again; "unopenable" never opened.
        assert_eq!(f.loader.opened.load(Ordering::SeqCst), 4);
        assert_eq!(f.loader.closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_load_can_be_retried() {
        let f = fixture();
        let first =
            tokio::time::timeout(Duration::from_millis(20), f.registry.load(&unit("slow"))).await;
        assert!(first.is_err());
        assert!(!f.registry.is_loaded("slow"));

        assert_eq!(f.registry.load(&unit("slow")).await.unwrap(), "slow");
        f.registry.unload("slow").await.unwrap();
        assert!(!f.registry.is_loaded("slow"));
    }

    #[tokio::test]
    async fn cancelled_unload_keeps_command_loaded() {
        let f = fixture();
        let gate = Arc::new(Notify::new());
        let wait = Arc::clone(&gate);
        f.registry
            .register_builtin(CommandDescriptor::new(
                "busy",
                "Waits for the test",
                handler_fn(move |_, _| {
                    let wait = Arc::clone(&wait);
                    async move {
                        wait.notified().await;
                        anyhow::Ok(())
                    }
                }),
            ))
            .unwrap();
        let task = f
            .registry
            .dispatch("busy", AccessLevel::Public, user_event("/busy"))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(20), f.registry.unload("busy")).await;
        assert!(first.is_err());
        assert!(f.registry.is_loaded("busy"));

        gate.notify_one();
        task.wait().await.unwrap();
        f.registry.unload("busy").await.unwrap();
        assert!(!f.registry.is_loaded("busy"));
    }

    #[tokio::test]
    async fn bad_file_name_is_load_failure() {
        let f = fixture();
        let err = f.registry.load(Path::new("/modules/readme.txt")).await;
        assert!(matches!(err, Err(RuntimeError::LoadFailure { .. })));
    }

    #[tokio::test]
    async fn unload_unknown_is_not_found() {
        let f = fixture();
        assert_eq!(
            f.registry.unload("ghost").await,
            Err(RuntimeError::NotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn unload_closes_handle() {
        let f = fixture();
        f.registry.load(&unit("ping")).await.unwrap();
        f.registry.unload("ping").await.unwrap();
        assert!(!f.registry.is_loaded("ping"));
        assert_eq!(f.loader.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn builtins_dispatch_but_do_not_reload() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        f.registry
            .register_builtin(CommandDescriptor::new(
                "count",
                "Count calls",
                handler_fn(move |_, _| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                }),
            ))
            .unwrap();

        let task = f
            .registry
            .dispatch("count", AccessLevel::Public, user_event("/count"))
            .await
            .unwrap();
        assert_eq!(task.label(), "count");
        task.wait().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            f.registry.reload("count").await,
            Err(RuntimeError::LoadFailure { .. })
        ));
    }

    #[tokio::test]
    async fn dispatch_unknown_replies_once() {
        let f = fixture();
        let err = f
            .registry
            .dispatch("nope", AccessLevel::Public, user_event("/nope"))
            .await
            .unwrap_err();
        assert_eq!(err, RuntimeError::NotFound("nope".into()));
        assert_eq!(f.sink.0.lock().as_slice(), &["Unknown command: /nope".to_string()]);
    }

    #[tokio::test]
    async fn argument_mismatch_replies_with_usage() {
        let f = fixture();
        f.registry
            .register_builtin(
                CommandDescriptor::new(
                    "pair",
                    "Needs two",
                    handler_fn(|_, _| async { anyhow::Ok(()) }),
                )
                .with_args(ArgContract::exact([2], SplitRule::Whitespace).with_usage("/pair a b")),
            )
            .unwrap();
        let err = f
            .registry
            .dispatch("pair", AccessLevel::Public, user_event("/pair one"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ArgumentMismatch { .. }));
        let replies = f.sink.0.lock().clone();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].ends_with("Usage: /pair a b"));
        assert_eq!(f.tasks.stats().submitted, 0);
    }

    #[tokio::test]
    async fn command_list_hides_and_marks() {
        let f = fixture();
        let noop = || handler_fn(|_, _| async { anyhow::Ok(()) });
        f.registry
            .register_builtin(CommandDescriptor::new("zed", "Last", noop()))
            .unwrap();
        f.registry
            .register_builtin(CommandDescriptor::new("admin", "Admin stuff", noop()).restricted())
            .unwrap();
        f.registry
            .register_builtin(CommandDescriptor::new("secret", "Hidden", noop()).hidden())
            .unwrap();

        let list = f.registry.command_list();
        assert_eq!(
            list,
            vec![
                CommandInfo {
                    name: "admin".into(),
                    description: "Admin stuff (Owner)".into()
                },
                CommandInfo {
                    name: "zed".into(),
                    description: "Last".into()
                },
            ]
        );
        assert_eq!(f.registry.names(), vec!["admin", "secret", "zed"]);
    }

    #[tokio::test]
    async fn load_dir_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["alpha", "refuses", "beta"] {
            std::fs::write(dir.path().join(unit_file_name(name)), b"").unwrap();
        }
        let f = fixture();
        let report = f.registry.load_dir(dir.path()).await;
        assert_eq!(report.loaded, vec!["alpha", "beta"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_clean());
    }
}
