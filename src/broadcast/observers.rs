use super::traits::{Observer, Verdict};
use crate::event::InboundEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Logs every inbound message.
#[derive(Debug, Default)]
pub struct ChatLogObserver {
    seen: AtomicU64,
}

impl ChatLogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Observer for ChatLogObserver {
    fn name(&self) -> &str {
        "chat-log"
    }

    async fn on_event(&self, event: &InboundEvent) -> anyhow::Result<Verdict> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let sender = event.sender.as_ref();
        info!(
            chat = event.chat_id,
            message = event.message_id,
            sender = sender.map_or(0, |s| s.id),
            username = sender.and_then(|s| s.username.as_deref()).unwrap_or("-"),
            text = event.text.as_deref().unwrap_or(""),
            "message received"
        );
        Ok(Verdict::Continue)
    }
}

/// Adapts a plain closure into an [`Observer`].
pub struct FnObserver<F> {
    name: String,
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&InboundEvent) -> anyhow::Result<Verdict> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Observer for FnObserver<F>
where
    F: Fn(&InboundEvent) -> anyhow::Result<Verdict> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &InboundEvent) -> anyhow::Result<Verdict> {
        (self.f)(event)
    }
}
