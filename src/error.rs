use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Client-visible error taxonomy for timer operations.
///
/// `Conflict`, `InvalidState` and `NotFound` are recoverable: the caller is
/// expected to re-fetch the active session and retry the correct operation.
/// `Storage` wraps persistence failures with their context chain.
#[derive(Debug, Error)]
pub enum Error {
    /// An invariant would be violated, e.g. a second active timer for a user.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not legal from the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown session, log or snapshot id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Corrupt or impossible stored data (negative elapsed, bad timestamps).
    /// Detection sites clamp to a safe value and log; this variant is for
    /// cases where no safe value exists.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Role-gated operation attempted without the required role.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl Error {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::InvalidState(_) | Error::NotFound(_)
        )
    }
}
