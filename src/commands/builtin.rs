//! Commands compiled into the binary.

use super::descriptor::{ArgContract, CommandContext, CommandDescriptor, SplitRule, handler_fn};
use super::registry::PluginRegistry;
use crate::config::TimerConfig;
use crate::error::RuntimeError;
use crate::event::InboundEvent;
use crate::workers::timer::parse_duration;
use crate::workers::{AcquirePolicy, TimerWorker, WorkerIdentity};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const TIMER: &str = "timer";
pub const STOP_TIMER: &str = "stoptimer";
pub const COMMANDS: &str = "commands";
pub const UNLOAD: &str = "unload";
pub const RELOAD: &str = "reload";

/// Registers every builtin. Fails on the first name clash.
pub fn register_all(registry: &PluginRegistry, timer: &TimerConfig) -> Result<(), RuntimeError> {
    registry.register_builtin(timer_command(timer.clone()))?;
    registry.register_builtin(stop_timer_command())?;
    registry.register_builtin(commands_command())?;
    registry.register_builtin(admin_command(UNLOAD, "Unload a command", Admin::Unload))?;
    registry.register_builtin(admin_command(RELOAD, "Reload a command", Admin::Reload))?;
    Ok(())
}

fn timer_command(bounds: TimerConfig) -> CommandDescriptor {
    let usage = "/timer <duration>, e.g. /timer 1h 30m";
    CommandDescriptor::new(
        TIMER,
        "Start a countdown in this chat",
        handler_fn(move |ctx: CommandContext, event: InboundEvent| {
            let bounds = bounds.clone();
            async move {
                let text = ctx.args.first().map_or("", String::as_str);
                let duration = match parse_duration(text, &bounds) {
                    Ok(duration) => duration,
                    Err(e) => return ctx.reply(&event, &e.to_string()).await,
                };
                let sink = Arc::clone(&ctx.sink);
                let update = Duration::from_secs(bounds.update_interval_secs);
                let origin = event.clone();
                let started = ctx.workers.acquire(
                    WorkerIdentity::Timer,
                    AcquirePolicy::FailIfRunning,
                    move || TimerWorker::new(duration, update, origin, sink),
                );
                match started {
                    Ok(_) => Ok(()),
                    Err(RuntimeError::AlreadyRunning(_)) => {
                        ctx.reply(&event, "A timer is already running, stop it with /stoptimer")
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }),
    )
    .with_args(ArgContract::exact([1], SplitRule::None).with_usage(usage))
}

fn stop_timer_command() -> CommandDescriptor {
    CommandDescriptor::new(
        STOP_TIMER,
        "Stop the running countdown",
        handler_fn(|ctx: CommandContext, event: InboundEvent| async move {
            let Some(timer) = ctx.workers.lookup::<TimerWorker>(WorkerIdentity::Timer) else {
                return ctx.reply(&event, "No timer is running").await;
            };
            if timer.chat_id() != event.chat_id {
                return ctx
                    .reply(&event, "The running timer belongs to another chat")
                    .await;
            }
            match ctx.workers.release(WorkerIdentity::Timer).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }),
    )
}

fn commands_command() -> CommandDescriptor {
    CommandDescriptor::new(
        COMMANDS,
        "List available commands",
        handler_fn(|ctx: CommandContext, event: InboundEvent| async move {
            let lines: Vec<String> = ctx
                .registry
                .command_list()
                .into_iter()
                .map(|info| format!("/{} - {}", info.name, info.description))
                .collect();
            ctx.reply(&event, &lines.join("\n")).await
        }),
    )
}

#[derive(Debug, Clone, Copy)]
enum Admin {
    Unload,
    Reload,
}

impl Admin {
    async fn apply(self, registry: &PluginRegistry, target: &str) -> Result<(), RuntimeError> {
        match self {
            Self::Unload => registry.unload(target).await,
            Self::Reload => registry.reload(target).await,
        }
    }

    fn done(self, target: &str) -> String {
        match self {
            Self::Unload => format!("Unloaded /{target}"),
            Self::Reload => format!("Reloaded /{target}"),
        }
    }
}

fn admin_command(name: &'static str, description: &str, op: Admin) -> CommandDescriptor {
    CommandDescriptor::new(
        name,
        description,
        handler_fn(move |ctx: CommandContext, event: InboundEvent| async move {
            let target = ctx
                .args
                .first()
                .map_or("", |a| a.trim_start_matches('/'))
                .to_string();
            if target == UNLOAD || target == RELOAD {
                return ctx
                    .reply(&event, &format!("/{name} cannot target /{target}"))
                    .await;
            }
            // Draining waits on the target's queued jobs, so it must not
            // occupy a pool worker while it does.
            tokio::spawn(async move {
                let text = match op.apply(&ctx.registry, &target).await {
                    Ok(()) => op.done(&target),
                    Err(e) => e.to_string(),
                };
                if let Err(e) = ctx.reply(&event, &text).await {
                    warn!(command = name, "failed to report result: {e:#}");
                }
            });
            Ok(())
        }),
    )
    .restricted()
    .with_args(ArgContract::exact([1], SplitRule::Whitespace).with_usage(format!("/{name} <command>")))
}
