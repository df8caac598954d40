//! Loads the real `cmd_echo` unit through the shared-library loader.
//!
//! The unit is a separate cdylib, so build it before running:
//! `cargo build -p cmd_echo && cargo test --test native_unit -- --ignored`

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use tgbot_runtime::auth::AllowAll;
use tgbot_runtime::channels::ReplySink;
use tgbot_runtime::commands::NativeUnitLoader;
use tgbot_runtime::commands::loader::unit_file_name;
use tgbot_runtime::{BotRuntime, Config, InboundEvent, RuntimeError, Sender};

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

fn built_echo_unit() -> PathBuf {
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target"), PathBuf::from);
    target
        .join("debug")
        .join(libloading::library_filename("cmd_echo"))
}

fn said(text: &str) -> InboundEvent {
    InboundEvent::text(5, Some(Sender::user(7)), text)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "needs `cargo build -p cmd_echo`"]
async fn echo_unit_loads_replies_and_unloads() {
    let built = built_echo_unit();
    let modules = tempfile::tempdir().unwrap();
    let unit = modules.path().join(unit_file_name("echo"));
    std::fs::copy(&built, &unit)
        .unwrap_or_else(|e| panic!("copy {}: {e}", built.display()));

    let sink = Arc::new(Recording::default());
    let rt = BotRuntime::new(
        Config::default(),
        Arc::new(NativeUnitLoader),
        Arc::clone(&sink) as Arc<dyn ReplySink>,
        Arc::new(AllowAll),
    );

    assert_eq!(rt.plugins().load(&unit).await.unwrap(), "echo");
    let task = rt
        .handle_event(said("/echo hello  there"))
        .await
        .unwrap()
        .expect("echo is a command");
    task.wait().await.unwrap();
    assert_eq!(sink.0.lock().as_slice(), &["hello  there".to_string()]);

    rt.plugins().unload("echo").await.unwrap();
    assert_eq!(
        rt.handle_event(said("/echo again")).await.unwrap_err(),
        RuntimeError::NotFound("echo".into())
    );
    rt.shutdown().await;
}
