use super::registry::PluginRegistry;
use crate::auth::AccessLevel;
use crate::channels::ReplySink;
use crate::event::InboundEvent;
use crate::workers::WorkerRegistry;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// Owner or whitelisted users only.
    pub restricted: bool,
    /// Left out of the published command list.
    pub hidden: bool,
}

/// How the text after the command name becomes arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitRule {
    /// The whole remainder is one argument.
    #[default]
    None,
    Whitespace,
    Comma,
    Newline,
}

impl SplitRule {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            tgbot_command_abi::SPLIT_NONE => Some(Self::None),
            tgbot_command_abi::SPLIT_WHITESPACE => Some(Self::Whitespace),
            tgbot_command_abi::SPLIT_COMMA => Some(Self::Comma),
            tgbot_command_abi::SPLIT_NEWLINE => Some(Self::Newline),
            _ => None,
        }
    }
}

/// Argument counts a command accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedCounts {
    Exact(BTreeSet<usize>),
    Range { min: usize, max: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgContract {
    /// Disabled contracts still split arguments but never reject.
    pub enabled: bool,
    /// `None` skips the count check.
    pub counts: Option<AcceptedCounts>,
    pub split: SplitRule,
    pub usage: Option<String>,
}

impl ArgContract {
    pub fn exact(counts: impl IntoIterator<Item = usize>, split: SplitRule) -> Self {
        Self {
            enabled: true,
            counts: Some(AcceptedCounts::Exact(counts.into_iter().collect())),
            split,
            usage: None,
        }
    }

    pub fn range(min: usize, max: usize, split: SplitRule) -> Self {
        Self {
            enabled: true,
            counts: Some(AcceptedCounts::Range { min, max }),
            split,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }
}

/// What a handler gets besides the event.
#[derive(Clone)]
pub struct CommandContext {
    pub command: String,
    pub args: Vec<String>,
    pub sink: Arc<dyn ReplySink>,
    pub workers: Arc<WorkerRegistry>,
    pub registry: Arc<PluginRegistry>,
}

impl CommandContext {
    pub async fn reply(&self, event: &InboundEvent, text: &str) -> anyhow::Result<()> {
        self.sink.reply(event, text).await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: CommandContext, event: InboundEvent) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandContext, InboundEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: CommandContext, event: InboundEvent) -> anyhow::Result<()> {
        (self.0)(ctx, event).await
    }
}

/// Wraps an async closure as a [`CommandHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandContext, InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A loaded command. Immutable once registered.
#[derive(Clone)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub flags: CommandFlags,
    pub args: ArgContract,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            flags: CommandFlags::default(),
            args: ArgContract::default(),
            handler,
        }
    }

    pub fn restricted(mut self) -> Self {
        self.flags.restricted = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.flags.hidden = true;
        self
    }

    pub fn with_args(mut self, args: ArgContract) -> Self {
        self.args = args;
        self
    }

    pub fn access_level(&self) -> AccessLevel {
        if self.flags.restricted {
            AccessLevel::Restricted
        } else {
            AccessLevel::Public
        }
    }

    /// Structural checks applied before a descriptor enters the registry.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("command name is empty");
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            anyhow::bail!(
                "command name '{}' may only contain a-z, 0-9 and '_'",
                self.name
            );
        }
        if self.description.trim().is_empty() {
            anyhow::bail!("command '{}' has no description", self.name);
        }
        match &self.args.counts {
            Some(AcceptedCounts::Exact(set)) if set.is_empty() => {
                anyhow::bail!("command '{}' accepts no argument count", self.name);
            }
            Some(AcceptedCounts::Range { min, max }) if min > max => {
                anyhow::bail!(
                    "command '{}' has inverted argument range {min}..={max}",
                    self.name
                );
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("flags", &self.flags)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn CommandHandler> {
        handler_fn(|_, _| async { anyhow::Ok(()) })
    }

    #[test]
    fn builder_sets_flags_and_level() {
        let d = CommandDescriptor::new("reload", "Reload a command", noop())
            .restricted()
            .hidden();
        assert!(d.flags.restricted && d.flags.hidden);
        assert_eq!(d.access_level(), AccessLevel::Restricted);
        d.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_descriptors() {
        assert!(CommandDescriptor::new("", "x", noop()).validate().is_err());
        assert!(CommandDescriptor::new("Bad-Name", "x", noop()).validate().is_err());
        assert!(CommandDescriptor::new("ok", " ", noop()).validate().is_err());
        assert!(
            CommandDescriptor::new("ok", "x", noop())
                .with_args(ArgContract::exact(Vec::<usize>::new(), SplitRule::Whitespace))
                .validate()
                .is_err()
        );
        assert!(
            CommandDescriptor::new("ok", "x", noop())
                .with_args(ArgContract::range(3, 1, SplitRule::Comma))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn split_rule_from_raw_rejects_unknown() {
        assert_eq!(SplitRule::from_raw(2), Some(SplitRule::Comma));
        assert_eq!(SplitRule::from_raw(9), None);
    }
}
