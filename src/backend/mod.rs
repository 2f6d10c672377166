//! Backend client contract for the cloud API
//!
//! The coordinator never talks HTTP directly. It drives servers through the
//! [`Backend`] trait, which exposes exactly the six remote operations it needs.
//! [`http::HttpBackend`] is the production implementation; tests plug in
//! scripted backends.
//!
//! Every operation takes a [`CancellationToken`]. Implementations must return
//! [`BackendError::Cancelled`] promptly once the token fires.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use http::HttpBackend;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A server as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server identifier (UUID in practice)
    #[serde(rename = "object_uuid", default)]
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Whether the server is powered on
    pub power: bool,
}

impl Server {
    /// Create a server record
    pub fn new(id: impl Into<String>, power: bool) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            power,
        }
    }
}

/// Errors returned by backend operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The object does not exist (HTTP 404)
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Any other non-success HTTP status
    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The operation's cancellation token fired before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// Build an error from an HTTP status code and response message
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 404 {
            Self::NotFound { message }
        } else {
            Self::Status { status, message }
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check whether the backend reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Remote operations the coordinator performs against the cloud API
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch a single server
    async fn get_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<Server>;

    /// Request power-on
    async fn start_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()>;

    /// Request a graceful, guest-initiated shutdown and wait for it
    async fn shutdown_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()>;

    /// Forced power-off
    async fn stop_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()>;

    /// Destroy the server; requires it to be powered off
    async fn delete_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()>;

    /// List every server visible to the tenant
    async fn get_server_list(&self, ctx: &CancellationToken) -> BackendResult<Vec<Server>>;
}
