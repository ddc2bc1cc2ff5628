use chrono::Duration;
use thiserror::Error;

/// Opaque failure reported by the vault service for any command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RemoteError(pub String);

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Clone, Debug, Error)]
pub enum EngineError {
    /// A remote command failed. Local state was left as it was before the call.
    #[error("{command} failed: {reason}")]
    Remote {
        command: &'static str,
        reason: String,
    },

    #[error("Authentication rejected ({attempts_remaining} attempts remaining)")]
    AuthRejected { attempts_remaining: u32 },

    /// Rejected only because the lockout window is still open.
    #[error("Too many failed attempts, try again in {}s", ceil_secs(*remaining))]
    AuthLocked { remaining: Duration },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Upload failed: {0}")]
    JobFailure(String),

    #[error("Invalid folder tree: {0}")]
    InvalidTree(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn remote(command: &'static str, err: RemoteError) -> Self {
        Self::Remote {
            command,
            reason: err.0,
        }
    }

    /// Seconds left in the lockout window, for countdown rendering.
    pub fn lockout_remaining_secs(&self) -> Option<i64> {
        match self {
            Self::AuthLocked { remaining } => Some(ceil_secs(*remaining)),
            _ => None,
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Seconds in `duration`, rounded up and never negative.
pub(crate) fn ceil_secs(duration: Duration) -> i64 {
    let millis = duration.num_milliseconds().max(0);
    (millis + 999) / 1_000
}
