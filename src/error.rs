//! Unified error handling for the powercycle crate
//!
//! This module provides a unified error type for the operator boundary: the
//! CLI runs every command through it so failures can be logged with a
//! category and a retry hint. Library callers keep matching on the domain
//! errors directly.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use powercycle::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!("Transient failure: {}", err);
//!     } else {
//!         tracing::error!("Fatal error: {}", err);
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::backend::BackendError;
pub use crate::coordinator::CoordinatorError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registry bookkeeping and lifecycle rules (unknown, duplicate, deleted)
    Coordination,
    /// Remote API failures
    Backend,
    /// Caller cancellation
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::Backend => "backend",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the powercycle crate
#[derive(Error, Debug)]
pub enum Error {
    /// Lifecycle coordinator errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Backend errors raised outside the coordinator
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Operator-level precondition failures
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if this error is recoverable (the operation may be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Coordinator(e) => match e {
                CoordinatorError::Backend(b) => backend_recoverable(b),
                CoordinatorError::Combined { restart, .. } => {
                    matches!(restart.as_ref(), CoordinatorError::Backend(b) if backend_recoverable(b))
                }
                _ => false,
            },
            Self::Backend(e) => backend_recoverable(e),
            Self::Other(_) => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Coordinator(e) => match e {
                CoordinatorError::Backend(_) => ErrorCategory::Backend,
                CoordinatorError::Cancelled => ErrorCategory::Cancelled,
                CoordinatorError::Action(_) | CoordinatorError::Combined { .. } => {
                    ErrorCategory::Other
                }
                _ => ErrorCategory::Coordination,
            },
            Self::Backend(BackendError::Cancelled) => ErrorCategory::Cancelled,
            Self::Backend(_) => ErrorCategory::Backend,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other(context.into())
    }
}

/// Server-side and transport failures are worth another attempt; 4xx are not
fn backend_recoverable(err: &BackendError) -> bool {
    match err {
        BackendError::Transport(_) => true,
        BackendError::Status { status, .. } => *status >= 500 || *status == 429,
        BackendError::NotFound { .. } | BackendError::Cancelled | BackendError::Decode(_) => false,
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
