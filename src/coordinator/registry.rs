//! Server status registry
//!
//! This module owns one [`ServerStatus`] per known server and implements the
//! lifecycle operations CRUD handlers call: start, graceful-then-forced
//! shutdown, remove, and the power-cycle envelope around offline-required
//! actions.
//!
//! The registry lock only guards the id → status map and is never held across
//! a backend call. Each operation holds at most one per-server lock at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use super::error::{combine, CoordinatorError, CoordinatorResult};
use super::status::{ServerSnapshot, ServerStatus, TransitionKind};
use crate::backend::{Backend, BackendError};
use crate::metrics;

// ============================================================================
// Server Status Registry
// ============================================================================

/// Registry of every server the coordinator knows about
#[derive(Debug)]
pub struct ServerStatusRegistry {
    /// Registered servers; tombstoned entries are kept for the process lifetime
    servers: RwLock<HashMap<String, Arc<ServerStatus>>>,

    config: CoordinatorConfig,
}

impl Default for ServerStatusRegistry {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl ServerStatusRegistry {
    /// Create an empty registry
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Coordinator configuration in use
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register a server
    ///
    /// Re-adding a known id is a caller bug and fails with `AlreadyExists`.
    pub async fn add_server(&self, id: &str) -> CoordinatorResult<()> {
        let mut servers = self.servers.write().await;

        if servers.contains_key(id) {
            return Err(CoordinatorError::AlreadyExists(id.to_string()));
        }

        servers.insert(id.to_string(), Arc::new(ServerStatus::new(id)));
        debug!(server_id = %id, "Server registered");
        Ok(())
    }

    /// Populate the registry from the backend inventory
    ///
    /// Existing entries are left untouched. Returns how many servers were added.
    pub async fn init_server_status_list(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
    ) -> CoordinatorResult<usize> {
        let inventory = client.get_server_list(ctx).await?;

        let mut servers = self.servers.write().await;
        let mut added = 0;
        for server in inventory {
            servers.entry(server.id).or_insert_with_key(|id| {
                added += 1;
                Arc::new(ServerStatus::new(id.clone()))
            });
        }

        info!(added, total = servers.len(), "Server status list initialized");
        Ok(added)
    }

    /// Power on a server
    pub async fn start_server_synchronously(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        id: &str,
    ) -> CoordinatorResult<()> {
        let status = self.lookup(id).await?;
        let guard = status.lock(TransitionKind::Start).await;
        status.ensure_live()?;

        let result = client.start_server(ctx, id).await.map_err(CoordinatorError::from);
        if result.is_ok() {
            guard.supersede_restart();
        }
        metrics::record_transition(guard.kind(), result.is_ok());
        result
    }

    /// Shut a server down, gracefully first and forcibly after the timeout
    pub async fn shutdown_server_synchronously(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        id: &str,
    ) -> CoordinatorResult<()> {
        let status = self.lookup(id).await?;
        let guard = status.lock(TransitionKind::Shutdown).await;
        status.ensure_live()?;

        let result = self.graceful_then_forced(ctx, client, id).await;
        if result.is_ok() {
            guard.supersede_restart();
        }
        metrics::record_transition(guard.kind(), result.is_ok());
        result
    }

    /// Shut a server down and delete it, leaving a tombstone on success
    pub async fn remove_server_synchronously(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        id: &str,
    ) -> CoordinatorResult<()> {
        let status = self.lookup(id).await?;
        let guard = status.lock(TransitionKind::Remove).await;
        status.ensure_live()?;

        let result = match self.graceful_then_forced(ctx, client, id).await {
            Ok(()) => client.delete_server(ctx, id).await.map_err(CoordinatorError::from),
            Err(e) => Err(e),
        };

        if result.is_ok() {
            guard.mark_deleted();
            guard.supersede_restart();
            info!(server_id = %id, "Server deleted");
        }
        metrics::record_transition(guard.kind(), result.is_ok());
        result
    }

    /// Run `action` while the server is powered off
    ///
    /// If the server is running it is shut down first and started again once
    /// the last concurrent offline-required action on it has finished. When the
    /// backend no longer knows the server, the action is skipped and `Ok` is
    /// returned unless `server_required` is set.
    ///
    /// Dropping the returned future is a cancellation: if no other envelope
    /// still shares the restart, the server is left powered off.
    pub async fn run_action_require_server_off<F, Fut>(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        id: &str,
        server_required: bool,
        action: F,
    ) -> CoordinatorResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let status = self.lookup(id).await?;
        let in_flight = status.enter();

        // The power decision is made under the server lock so it cannot
        // interleave with another envelope's restart.
        let claim = {
            let guard = status.lock(TransitionKind::Inspect).await;
            status.ensure_live()?;

            let server = match client.get_server(ctx, id).await {
                Ok(server) => server,
                Err(e) if e.is_not_found() && !server_required => {
                    debug!(server_id = %id, "Server is gone, skipping offline action");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if server.power {
                let result = self.graceful_then_forced(ctx, client, id).await;
                metrics::record_transition(TransitionKind::ActionShutdown, result.is_ok());
                result?;
                Some(guard.begin_restart_epoch())
            } else {
                // Off because an earlier envelope shut it down: share its restart.
                guard.join_restart_epoch()
            }
        };

        let action_result = action(ctx.clone()).await;
        drop(in_flight);

        let Some(_claim) = claim else {
            return action_result.map_err(CoordinatorError::Action);
        };

        let restart_result = self.restart_when_idle(ctx, client, &status).await;
        combine(action_result, restart_result)
    }

    /// Point-in-time view of one server
    pub async fn snapshot(&self, id: &str) -> Option<ServerSnapshot> {
        self.servers.read().await.get(id).map(|s| s.snapshot())
    }

    /// Whether `id` is registered (tombstoned entries included)
    pub async fn contains(&self, id: &str) -> bool {
        self.servers.read().await.contains_key(id)
    }

    /// Number of registered servers (tombstoned entries included)
    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Whether no server is registered
    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let servers = self.servers.read().await;

        let mut stats = RegistryStats {
            total: servers.len(),
            ..Default::default()
        };

        for status in servers.values() {
            if status.is_deleted() {
                stats.deleted += 1;
            }
            let in_flight = status.in_flight();
            if in_flight > 0 {
                stats.busy += 1;
                stats.actions_in_flight += in_flight;
            }
        }

        stats
    }

    async fn lookup(&self, id: &str) -> CoordinatorResult<Arc<ServerStatus>> {
        self.servers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownServer(id.to_string()))
    }

    /// Two-phase shutdown; the caller holds the server lock
    async fn graceful_then_forced(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        id: &str,
    ) -> CoordinatorResult<()> {
        let shutdown_ctx = ctx.child_token();
        let timeout = self.config.shutdown_timeout();

        let graceful =
            match tokio::time::timeout(timeout, client.shutdown_server(&shutdown_ctx, id)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    shutdown_ctx.cancel();
                    Err(BackendError::Cancelled)
                }
            };

        match graceful {
            Ok(()) => return Ok(()),
            Err(BackendError::Cancelled) if shutdown_ctx.is_cancelled() => {}
            Err(e) => return Err(e.into()),
        }

        if ctx.is_cancelled() {
            debug!(server_id = %id, "Caller cancelled during graceful shutdown, not forcing stop");
            return Err(CoordinatorError::Cancelled);
        }

        warn!(
            server_id = %id,
            timeout_secs = timeout.as_secs(),
            "Graceful shutdown timed out, forcing stop"
        );
        metrics::record_forced_stop();
        client.stop_server(ctx, id).await?;
        Ok(())
    }

    /// Restart barrier: power on once no action on this server is in flight
    ///
    /// The caller holds a [`RestartClaim`](super::status::RestartClaim) for the
    /// whole wait, so the epoch stays open until it returns.
    async fn restart_when_idle(
        &self,
        ctx: &CancellationToken,
        client: &dyn Backend,
        status: &ServerStatus,
    ) -> CoordinatorResult<()> {
        let id = status.id();

        loop {
            status.wait_idle().await;

            let guard = status.lock(TransitionKind::Restart).await;
            status.ensure_live()?;

            let in_flight = status.in_flight();
            if in_flight > 0 {
                // A newcomer entered after the barrier; it may leave without restarting.
                debug!(server_id = %id, in_flight, "Offline action arrived before restart, waiting again");
                continue;
            }

            if !guard.take_restart_pending() {
                debug!(server_id = %id, "No restart pending, already handled");
                return Ok(());
            }

            return match client.start_server(ctx, id).await {
                Ok(()) => {
                    info!(server_id = %id, "Server restarted after offline actions");
                    metrics::record_transition(guard.kind(), true);
                    Ok(())
                }
                Err(e) => {
                    // Another claim holder of this epoch may still retry.
                    guard.mark_restart_pending();
                    warn!(server_id = %id, error = %e, "Restart after offline actions failed");
                    metrics::record_transition(guard.kind(), false);
                    Err(e.into())
                }
            };
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub deleted: usize,
    pub busy: usize,
    pub actions_in_flight: usize,
}

impl RegistryStats {
    /// Servers not tombstoned
    pub fn live(&self) -> usize {
        self.total - self.deleted
    }

    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Server Registry\n\
             {:-<30}\n\
             Total Servers: {}\n\
             - Live: {}\n\
             - Deleted: {}\n\
             Busy Servers: {}\n\
             Actions In Flight: {}",
            "",
            self.total,
            self.live(),
            self.deleted,
            self.busy,
            self.actions_in_flight
        )
    }
}

// ============================================================================
// Process-global registry
// ============================================================================

static GLOBAL_REGISTRY: OnceLock<Arc<ServerStatusRegistry>> = OnceLock::new();

/// Install the process-global registry; only the first call succeeds
pub fn install_global(
    registry: Arc<ServerStatusRegistry>,
) -> CoordinatorResult<Arc<ServerStatusRegistry>> {
    GLOBAL_REGISTRY
        .set(registry.clone())
        .map_err(|_| CoordinatorError::GlobalAlreadyInstalled)?;
    Ok(registry)
}

/// The process-global registry, if installed
pub fn global() -> Option<Arc<ServerStatusRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

/// Populate the process-global registry from the backend inventory
pub async fn init_global_server_status_list(
    ctx: &CancellationToken,
    client: &dyn Backend,
) -> CoordinatorResult<usize> {
    let registry = global().ok_or(CoordinatorError::GlobalNotInstalled)?;
    registry.init_server_status_list(ctx, client).await
}

// ============================================================================
// Tests
// ============================================================================
