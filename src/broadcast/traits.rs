use crate::event::InboundEvent;
use async_trait::async_trait;

/// What an observer wants after seeing an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verdict {
    #[default]
    Continue,
    /// Remove this observer once the current round has finished.
    Deregister,
}

/// Sees every inbound event, commands included. Observers cannot stop an
/// event from reaching the command router.
#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &InboundEvent) -> anyhow::Result<Verdict>;
}
