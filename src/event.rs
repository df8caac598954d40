use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who sent an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Sender {
    pub fn user(id: i64) -> Self {
        Self {
            id,
            username: None,
            is_bot: false,
        }
    }
}

/// A message received from the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: Option<Sender>,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// Text message from `sender` stamped with the current time.
    pub fn text(chat_id: i64, sender: Option<Sender>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id: 0,
            sender,
            text: Some(text.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = message_id;
        self
    }

    /// A human sender the bot can answer.
    pub fn from_known_user(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_bot)
    }

    pub fn command(&self) -> Option<ParsedCommand> {
        self.text.as_deref().and_then(ParsedCommand::parse)
    }
}

/// `/name[@target] rest` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub target: Option<String>,
    pub rest: String,
}

impl ParsedCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.find(char::is_whitespace) {
            Some(idx) => (&body[..idx], body[idx..].trim_start()),
            None => (body, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target.trim())),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            target: target.filter(|t| !t.is_empty()).map(str::to_string),
            rest: rest.to_string(),
        })
    }

    /// `true` when the command carries no `@target` or names `bot_username`.
    pub fn addressed_to(&self, bot_username: Option<&str>) -> bool {
        match (&self.target, bot_username) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(target), Some(me)) => target.eq_ignore_ascii_case(me),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_command() {
        let cmd = ParsedCommand::parse("/echo hello world").unwrap();
        assert_eq!(cmd.name, "echo");
        assert_eq!(cmd.target, None);
        assert_eq!(cmd.rest, "hello world");
    }

    #[test]
    fn parses_targeted_command_without_args() {
        let cmd = ParsedCommand::parse("/start@my_bot").unwrap();
        assert_eq!(cmd.name, "start");
        assert_eq!(cmd.target.as_deref(), Some("my_bot"));
        assert!(cmd.rest.is_empty());
    }

    #[test]
    fn rejects_non_commands() {
        assert!(ParsedCommand::parse("hello").is_none());
        assert!(ParsedCommand::parse("/").is_none());
        assert!(ParsedCommand::parse("/@bot").is_none());
    }

    #[test]
    fn target_matching_ignores_case() {
        let cmd = ParsedCommand::parse("/echo@My_Bot hi").unwrap();
        assert!(cmd.addressed_to(Some("my_bot")));
        assert!(!cmd.addressed_to(Some("other_bot")));
        assert!(cmd.addressed_to(None));
    }

    #[test]
    fn known_user_excludes_bots_and_anonymous() {
        let mut event = InboundEvent::text(1, Some(Sender::user(5)), "/x");
        assert!(event.from_known_user());
        event.sender.as_mut().unwrap().is_bot = true;
        assert!(!event.from_known_user());
        event.sender = None;
        assert!(!event.from_known_user());
    }
}
