use crate::event::InboundEvent;
use async_trait::async_trait;

/// Outbound side of the chat backend: answer an inbound event in its chat.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Human-readable sink name
    fn name(&self) -> &str;

    async fn reply(&self, event: &InboundEvent, text: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording(Mutex<Vec<(i64, String)>>);

    #[async_trait]
    impl ReplySink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn reply(&self, event: &InboundEvent, text: &str) -> anyhow::Result<()> {
            self.0.lock().push((event.chat_id, text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn reply_targets_event_chat() {
        let sink = Recording(Mutex::new(Vec::new()));
        let event = InboundEvent::text(77, None, "hi");
        sink.reply(&event, "pong").await.unwrap();
        assert_eq!(sink.0.lock().as_slice(), &[(77, "pong".to_string())]);
        assert_eq!(sink.name(), "recording");
    }
}
