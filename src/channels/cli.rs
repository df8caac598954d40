use super::traits::ReplySink;
use crate::event::{InboundEvent, Sender};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};

const CLI_CHAT_ID: i64 = 0;

/// CLI channel: stdin lines become events, replies go to stdout.
pub struct CliChannel {
    sender: Sender,
    next_message_id: AtomicI64,
}

impl CliChannel {
    /// Lines are attributed to `user_id` (typically the configured owner).
    pub fn new(user_id: i64) -> Self {
        Self {
            sender: Sender {
                id: user_id,
                username: Some("cli".to_string()),
                is_bot: false,
            },
            next_message_id: AtomicI64::new(1),
        }
    }

    fn event_for(&self, line: String) -> InboundEvent {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        InboundEvent::text(CLI_CHAT_ID, Some(self.sender.clone()), line).with_message_id(id)
    }

    /// Reads stdin until EOF, `/quit` or the receiver goes away.
    pub async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }
            if tx.send(self.event_for(line)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReplySink for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn reply(&self, _event: &InboundEvent, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_channel_name() {
        assert_eq!(CliChannel::new(1).name(), "cli");
    }

    #[test]
    fn events_carry_owner_and_increasing_ids() {
        let ch = CliChannel::new(42);
        let a = ch.event_for("/echo hi".into());
        let b = ch.event_for("hello".into());
        assert_eq!(a.sender.as_ref().map(|s| s.id), Some(42));
        assert!(a.from_known_user());
        assert_eq!(a.message_id + 1, b.message_id);
        assert_eq!(a.command().unwrap().name, "echo");
    }

    #[tokio::test]
    async fn cli_channel_reply_does_not_panic() {
        let ch = CliChannel::new(1);
        let event = InboundEvent::text(0, None, "x");
        assert!(ch.reply(&event, "hello").await.is_ok());
        assert!(ch.reply(&event, "").await.is_ok());
    }
}
