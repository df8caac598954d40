#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tgbot_runtime::auth::ListAuthorizer;
use tgbot_runtime::broadcast::ChatLogObserver;
use tgbot_runtime::channels::{CliChannel, ReplySink};
use tgbot_runtime::commands::NativeUnitLoader;
use tgbot_runtime::{BotRuntime, Config, InboundEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Chat-bot host with hot-swappable command units.
#[derive(Parser, Debug)]
#[command(name = "tgbot")]
#[command(version)]
#[command(about = "Chat-bot host with hot-swappable command units.", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir, e.g. ~/.config/tgbot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `runtime.modules_dir`
    #[arg(long)]
    modules_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(dir) = cli.modules_dir {
        config.runtime.modules_dir = dir;
    }
    if let Some(path) = &config.config_path {
        info!(path = %path.display(), "config loaded");
    }

    let channel = Arc::new(CliChannel::new(config.auth.owner_id.unwrap_or(0)));
    let authorizer = Arc::new(ListAuthorizer::new(&config.auth));
    let runtime = Arc::new(BotRuntime::new(
        config,
        Arc::new(NativeUnitLoader),
        Arc::clone(&channel) as Arc<dyn ReplySink>,
        authorizer,
    ));

    runtime.register_builtins()?;
    runtime.broadcast().register(Arc::new(ChatLogObserver::new()));

    let report = runtime.load_modules().await;
    for (path, e) in &report.failed {
        warn!(path = %path.display(), "skipped unit: {e}");
    }
    let commands: Vec<String> = runtime
        .plugins()
        .command_list()
        .into_iter()
        .map(|c| format!("/{}", c.name))
        .collect();
    info!(commands = %commands.join(" "), "ready");

    let (tx, mut rx) = mpsc::channel::<InboundEvent>(64);
    let listener = tokio::spawn({
        let channel = Arc::clone(&channel);
        async move { channel.listen(tx).await }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            next = rx.recv() => {
                let Some(event) = next else { break };
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move { handle(&runtime, event).await });
            }
        }
    }

    listener.abort();
    runtime.shutdown().await;
    Ok(())
}

async fn handle(runtime: &BotRuntime, event: InboundEvent) {
    match runtime.handle_event(event).await {
        Ok(Some(task)) => {
            let label = task.label().to_string();
            if let Err(e) = task.wait().await {
                warn!(command = %label, "command failed: {e}");
            }
        }
        Ok(None) => {}
        Err(e) => debug!("event not handled: {e}"),
    }
}
