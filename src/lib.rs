//! powercycle - server lifecycle coordination for cloud infrastructure providers
//!
//! Many cloud resources (network interfaces, IP addresses, storages, ISO
//! images) can only be detached or reattached while their server is powered
//! off. This crate serializes those power transitions per server so that
//! concurrent handlers can safely run offline-required mutations.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`backend`] - Cloud API contract and its HTTP implementation
//! - [`coordinator`] - Per-server locks, in-flight counters and the registry
//! - [`config`] - Configuration management and settings
//! - [`error`] - Unified error type
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use powercycle::backend::HttpBackend;
//! use powercycle::config::Config;
//! use powercycle::coordinator::ServerStatusRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let backend = HttpBackend::new(&config.backend)?;
//!     let registry = ServerStatusRegistry::new(config.coordinator.clone());
//!     let ctx = CancellationToken::new();
//!
//!     registry.init_server_status_list(&ctx, &backend).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{Backend, BackendError, HttpBackend, Server};
    pub use crate::config::Config;
    pub use crate::coordinator::{
        CoordinatorConfig, CoordinatorError, CoordinatorResult, ServerStatusRegistry,
    };
    pub use crate::error::{Error, ErrorCategory, Result};
}

// Direct re-exports for convenience
pub use coordinator::{CoordinatorError, ServerStatusRegistry};
