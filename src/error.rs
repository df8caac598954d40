use crate::auth::DenyReason;
use crate::workers::WorkerIdentity;

/// Typed error for registry and dispatch operations, so callers (and the
/// builtin admin commands) can pattern-match on the failure instead of
/// parsing strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// A unit could not be opened, resolved, entered or validated.
    #[error("failed to load {unit}: {reason}")]
    LoadFailure { unit: String, reason: String },

    /// A command with the same name is already registered (or loading).
    #[error("command '{0}' is already registered")]
    AlreadyExists(String),

    /// A worker already occupies this identity.
    #[error("worker {0} is already running")]
    AlreadyRunning(WorkerIdentity),

    /// The worker slot is occupied by a different worker type.
    #[error("worker {0} was started with a different type")]
    WorkerTypeMismatch(WorkerIdentity),

    /// Unknown command name or worker identity.
    #[error("'{0}' not found")]
    NotFound(String),

    /// The event's arguments do not satisfy the command's contract.
    #[error("invalid arguments for '{command}': {message}")]
    ArgumentMismatch { command: String, message: String },

    /// The authoriser refused the event.
    #[error("'{command}' denied: {reason}")]
    Unauthorized { command: String, reason: DenyReason },

    /// The task tracker no longer accepts work.
    #[error("task tracker is shut down")]
    Closed,
}

impl RuntimeError {
    pub(crate) fn load_failure(unit: impl Into<String>, reason: impl ToString) -> Self {
        Self::LoadFailure {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }
}
