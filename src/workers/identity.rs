use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a long-lived background worker. At most one live
/// worker exists per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerIdentity {
    /// Control socket bound to the local machine.
    SocketInternal,
    /// Control socket reachable from other hosts.
    SocketExternal,
    SpamBlock,
    LogServer,
    WebServer,
    /// Countdown started by `/timer`.
    Timer,
}

impl WorkerIdentity {
    pub const ALL: [Self; 6] = [
        Self::SocketInternal,
        Self::SocketExternal,
        Self::SpamBlock,
        Self::LogServer,
        Self::WebServer,
        Self::Timer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SocketInternal => "socket-internal",
            Self::SocketExternal => "socket-external",
            Self::SpamBlock => "spam-block",
            Self::LogServer => "log-server",
            Self::WebServer => "web-server",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde_name() {
        for identity in WorkerIdentity::ALL {
            let json = serde_json::to_string(&identity).unwrap();
            assert_eq!(json, format!("\"{identity}\""));
        }
    }
}
