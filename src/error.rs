use crate::model::SessionKey;
use thiserror::Error;

/// Failure taxonomy for session store operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The targeted session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A create collided with a live session for the same triple.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// Malformed identifiers or state keys supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An append re-used an event id already present in the session's log.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// The backing store could not be reached or timed out.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// A stored payload could not be decoded back into its document type.
    #[error("corrupt stored payload: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

pub(crate) fn not_found(key: &SessionKey) -> SessionError {
    SessionError::NotFound(key.to_string())
}

pub(crate) fn already_exists(key: &SessionKey) -> SessionError {
    SessionError::AlreadyExists(key.to_string())
}

pub(crate) fn invalid_argument(msg: impl Into<String>) -> SessionError {
    SessionError::InvalidArgument(msg.into())
}

pub(crate) fn conflict(msg: impl Into<String>) -> SessionError {
    SessionError::Conflict(msg.into())
}

#[cfg(feature = "redis")]
pub(crate) fn corrupt(msg: impl Into<String>) -> SessionError {
    SessionError::Corrupt(msg.into())
}

#[cfg(feature = "redis")]
pub(crate) fn redis_error(err: redis::RedisError) -> SessionError {
    SessionError::Unavailable(err.to_string())
}
