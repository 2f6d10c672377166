//! Error types for the lifecycle coordinator

use crate::backend::BackendError;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Server id was never registered
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// `add_server` called twice for the same id
    #[error("server already exists: {0}")]
    AlreadyExists(String),

    /// Server was deleted through the coordinator
    #[error("server already deleted: {0}")]
    AlreadyDeleted(String),

    /// Backend rejected an operation
    #[error(transparent)]
    Backend(BackendError),

    /// Caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The offline-required action failed; the server was restarted if needed
    #[error("action failed: {0:#}")]
    Action(anyhow::Error),

    /// Both the action and the subsequent restart failed
    #[error("action failed: {action:#}; restart failed: {restart}")]
    Combined {
        action: anyhow::Error,
        restart: Box<CoordinatorError>,
    },

    /// A process-global registry was already installed
    #[error("global server status registry already installed")]
    GlobalAlreadyInstalled,

    /// No process-global registry has been installed
    #[error("global server status registry not installed")]
    GlobalNotInstalled,
}

impl CoordinatorError {
    /// HTTP status of the underlying backend error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend(e) => e.status(),
            _ => None,
        }
    }

    /// Whether the backend reported the server as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_not_found())
    }

    /// Whether this error indicates a caller bug rather than a runtime failure
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownServer(_)
                | Self::AlreadyExists(_)
                | Self::GlobalAlreadyInstalled
                | Self::GlobalNotInstalled
        )
    }
}

impl From<BackendError> for CoordinatorError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => Self::Cancelled,
            other => Self::Backend(other),
        }
    }
}

/// Merge an action result with the restart that followed it
pub(crate) fn combine(
    action: anyhow::Result<()>,
    restart: CoordinatorResult<()>,
) -> CoordinatorResult<()> {
    match (action, restart) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(action), Ok(())) => Err(CoordinatorError::Action(action)),
        (Ok(()), Err(restart)) => Err(restart),
        (Err(action), Err(restart)) => Err(CoordinatorError::Combined {
            action,
            restart: Box::new(restart),
        }),
    }
}
