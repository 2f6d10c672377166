//! Server lifecycle coordinator
//!
//! Serializes state-changing operations against remote servers so that
//! resources which can only be detached while a server is off (network
//! interfaces, IP addresses, storages, ISO images) can be changed safely from
//! concurrent handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          ServerStatusRegistry            │
//! │  id → ServerStatus                       │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │ ServerStatus                       │  │
//! │  │  - transition lock (start/stop/rm) │  │
//! │  │  - in-flight action counter        │  │
//! │  │  - tombstone                       │  │
//! │  │  - restart epoch (pending, owners) │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//!                    │
//!                    ▼
//!           ┌─────────────────┐
//!           │ Backend (trait) │
//!           └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use powercycle::coordinator::{CoordinatorConfig, ServerStatusRegistry};
//!
//! let registry = ServerStatusRegistry::new(CoordinatorConfig::default());
//! registry.init_server_status_list(&ctx, &backend).await?;
//! registry
//!     .run_action_require_server_off(&ctx, &backend, &server_id, false, |ctx| async move {
//!         detach_storage(&ctx).await
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod status;

// Re-export main types
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, CoordinatorResult};
pub use registry::{
    global, init_global_server_status_list, install_global, RegistryStats, ServerStatusRegistry,
};
pub use status::{RestartClaim, ServerSnapshot, ServerStatus, TransitionGuard, TransitionKind};
