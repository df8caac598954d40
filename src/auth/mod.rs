//! Who may run which command.

use crate::config::AuthConfig;
use crate::event::InboundEvent;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;

/// Required access level. `Restricted` is stricter than `Public`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    #[default]
    Public,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    RequiresUser,
    UserIsBot,
    MessageTooOld,
    Blacklisted,
    NotInWhitelist,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RequiresUser => "requires a user",
            Self::UserIsBot => "sender is a bot",
            Self::MessageTooOld => "message too old",
            Self::Blacklisted => "user is blacklisted",
            Self::NotInWhitelist => "user is not in whitelist",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied(DenyReason),
}

impl AuthDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decides whether an event may trigger a command at `level`.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, event: &InboundEvent, level: AccessLevel) -> AuthDecision;
}

/// Lets everything through. Used in tests and for headless setups.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _event: &InboundEvent, _level: AccessLevel) -> AuthDecision {
        AuthDecision::Allowed
    }
}

/// Owner / whitelist / blacklist policy driven by `[auth]`.
pub struct ListAuthorizer {
    owner_id: Option<i64>,
    whitelist: HashSet<i64>,
    blacklist: HashSet<i64>,
    allow_bots: bool,
    max_age: chrono::Duration,
}

impl ListAuthorizer {
    pub fn new(config: &AuthConfig) -> Self {
        let max_age = i64::try_from(config.max_message_age_secs).unwrap_or(i64::MAX);
        Self {
            owner_id: config.owner_id,
            whitelist: config.whitelist.iter().copied().collect(),
            blacklist: config.blacklist.iter().copied().collect(),
            allow_bots: config.allow_bots,
            max_age: chrono::Duration::try_seconds(max_age).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn is_privileged(&self, user: i64) -> bool {
        self.owner_id == Some(user) || self.whitelist.contains(&user)
    }
}

impl Authorizer for ListAuthorizer {
    fn authorize(&self, event: &InboundEvent, level: AccessLevel) -> AuthDecision {
        let Some(sender) = &event.sender else {
            return AuthDecision::Denied(DenyReason::RequiresUser);
        };
        if sender.is_bot && !self.allow_bots {
            return AuthDecision::Denied(DenyReason::UserIsBot);
        }
        if Utc::now() - event.timestamp > self.max_age {
            return AuthDecision::Denied(DenyReason::MessageTooOld);
        }
        if self.blacklist.contains(&sender.id) && !self.is_privileged(sender.id) {
            return AuthDecision::Denied(DenyReason::Blacklisted);
        }
        if level == AccessLevel::Restricted && !self.is_privileged(sender.id) {
            return AuthDecision::Denied(DenyReason::NotInWhitelist);
        }
        AuthDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Sender;

    fn authorizer() -> ListAuthorizer {
        ListAuthorizer::new(&AuthConfig {
            owner_id: Some(1),
            whitelist: vec![2],
            blacklist: vec![3],
            allow_bots: false,
            max_message_age_secs: 60,
        })
    }

    fn from(id: i64) -> InboundEvent {
        InboundEvent::text(10, Some(Sender::user(id)), "/x")
    }

    #[test]
    fn restricted_is_stricter_than_public() {
        assert!(AccessLevel::Restricted > AccessLevel::Public);
        assert_eq!(
            AccessLevel::Public.max(AccessLevel::Restricted),
            AccessLevel::Restricted
        );
    }

    #[test]
    fn public_allows_ordinary_users() {
        assert!(authorizer().authorize(&from(9), AccessLevel::Public).is_allowed());
    }

    #[test]
    fn restricted_needs_owner_or_whitelist() {
        let auth = authorizer();
        assert!(auth.authorize(&from(1), AccessLevel::Restricted).is_allowed());
        assert!(auth.authorize(&from(2), AccessLevel::Restricted).is_allowed());
        assert_eq!(
            auth.authorize(&from(9), AccessLevel::Restricted),
            AuthDecision::Denied(DenyReason::NotInWhitelist)
        );
    }

    #[test]
    fn anonymous_bots_blacklisted_and_stale_are_denied() {
        let auth = authorizer();

        let mut anon = from(9);
        anon.sender = None;
        assert_eq!(
            auth.authorize(&anon, AccessLevel::Public),
            AuthDecision::Denied(DenyReason::RequiresUser)
        );

        let mut bot = from(9);
        bot.sender.as_mut().unwrap().is_bot = true;
        assert_eq!(
            auth.authorize(&bot, AccessLevel::Public),
            AuthDecision::Denied(DenyReason::UserIsBot)
        );

        assert_eq!(
            auth.authorize(&from(3), AccessLevel::Public),
            AuthDecision::Denied(DenyReason::Blacklisted)
        );

        let mut stale = from(9);
        stale.timestamp = Utc::now() - chrono::Duration::seconds(600);
        assert_eq!(
            auth.authorize(&stale, AccessLevel::Public),
            AuthDecision::Denied(DenyReason::MessageTooOld)
        );
    }
}
