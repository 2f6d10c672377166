//! Per-server coordination state
//!
//! A [`ServerStatus`] pairs a transition mutex with an in-flight counter.
//! The mutex serializes control-plane transitions (start, shutdown, delete,
//! restart) and is held only for the remote call performing the transition.
//! Offline-required actions run outside the mutex but are counted, so the
//! server is powered back on only once the count drops to zero.
//!
//! The restart obligation belongs to a shutdown epoch: it is opened by the
//! envelope that powered the server off, shared by envelopes that found it
//! off, and closed by the restart, by an explicit transition, or when the
//! last envelope holding a [`RestartClaim`] goes away.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::MutexGuard as StdMutexGuard;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::error::{CoordinatorError, CoordinatorResult};
use crate::metrics;

// ============================================================================
// Transition Kind
// ============================================================================

/// Control-plane transition performed while holding a server's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Power-on requested by a caller
    Start,

    /// Graceful-then-forced shutdown requested by a caller
    Shutdown,

    /// Shutdown followed by deletion
    Remove,

    /// Power-state check deciding whether an offline-required action needs a shutdown
    Inspect,

    /// Shutdown performed on behalf of an offline-required action
    ActionShutdown,

    /// Power-on after the last offline-required action finished
    Restart,
}

impl TransitionKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Shutdown => "shutdown",
            Self::Remove => "remove",
            Self::Inspect => "inspect",
            Self::ActionShutdown => "action_shutdown",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Server Status
// ============================================================================

/// Coordination record for one server
#[derive(Debug)]
pub struct ServerStatus {
    id: String,

    /// Serializes control-plane transitions
    transition: Mutex<()>,

    /// Number of offline-required actions currently inside an envelope
    in_flight: watch::Sender<usize>,

    /// Tombstone, set once after a successful delete
    deleted: AtomicBool,

    /// Restart obligation of the current shutdown epoch
    restart: std::sync::Mutex<RestartState>,
}

#[derive(Debug, Default)]
struct RestartState {
    /// An envelope powered the server off and nobody has restarted it yet
    pending: bool,

    /// Envelopes still alive that will attempt the restart
    owners: usize,
}

impl ServerStatus {
    /// Create a live status with no actions in flight
    pub fn new(id: impl Into<String>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            id: id.into(),
            transition: Mutex::new(()),
            in_flight,
            deleted: AtomicBool::new(false),
            restart: std::sync::Mutex::new(RestartState::default()),
        }
    }

    /// Server identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the transition lock
    pub async fn lock(&self, kind: TransitionKind) -> TransitionGuard<'_> {
        let guard = self.transition.lock().await;
        debug!(server_id = %self.id, transition = %kind, lock = "acquired", "Server lock acquired");
        TransitionGuard {
            status: self,
            kind,
            _guard: guard,
        }
    }

    /// Whether the server has been deleted through the coordinator
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Fail with `AlreadyDeleted` if the tombstone is set
    pub fn ensure_live(&self) -> CoordinatorResult<()> {
        if self.is_deleted() {
            return Err(CoordinatorError::AlreadyDeleted(self.id.clone()));
        }
        Ok(())
    }

    /// Number of offline-required actions in flight
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Whether a coordinator-initiated shutdown still awaits its restart
    pub fn restart_pending(&self) -> bool {
        self.restart_state().pending
    }

    /// Number of envelopes holding a claim on the pending restart
    pub fn restart_owners(&self) -> usize {
        self.restart_state().owners
    }

    fn restart_state(&self) -> StdMutexGuard<'_, RestartState> {
        self.restart.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one offline-required action until the guard is dropped
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.send_modify(|n| *n += 1);
        metrics::envelope_entered();
        InFlightGuard { status: self }
    }

    /// Wait until no offline-required action is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Point-in-time view for introspection
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id.clone(),
            in_flight: self.in_flight(),
            deleted: self.is_deleted(),
            restart_pending: self.restart_pending(),
            restart_owners: self.restart_owners(),
        }
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Proof that the transition lock is held; logs the release on drop
pub struct TransitionGuard<'a> {
    status: &'a ServerStatus,
    kind: TransitionKind,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> TransitionGuard<'a> {
    /// Transition this guard was taken for
    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    /// Set the tombstone
    pub fn mark_deleted(&self) {
        self.status.deleted.store(true, Ordering::Release);
    }

    /// Open a shutdown epoch after powering the server off for an action
    pub fn begin_restart_epoch(&self) -> RestartClaim<'a> {
        let mut state = self.status.restart_state();
        state.pending = true;
        state.owners += 1;
        RestartClaim {
            status: self.status,
        }
    }

    /// Join the open shutdown epoch, if there is one
    pub fn join_restart_epoch(&self) -> Option<RestartClaim<'a>> {
        let mut state = self.status.restart_state();
        if !state.pending {
            return None;
        }
        state.owners += 1;
        Some(RestartClaim {
            status: self.status,
        })
    }

    /// Put the restart back up for grabs after a failed attempt
    pub fn mark_restart_pending(&self) {
        self.status.restart_state().pending = true;
    }

    /// Claim the pending restart, returning whether there was one
    pub fn take_restart_pending(&self) -> bool {
        std::mem::take(&mut self.status.restart_state().pending)
    }

    /// Drop the pending restart; an explicit transition decides the power state now
    pub fn supersede_restart(&self) -> bool {
        let superseded = std::mem::take(&mut self.status.restart_state().pending);
        if superseded {
            debug!(
                server_id = %self.status.id,
                transition = %self.kind,
                "Pending restart superseded"
            );
        }
        superseded
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        debug!(
            server_id = %self.status.id,
            transition = %self.kind,
            lock = "released",
            "Server lock released"
        );
    }
}

/// An envelope's share of the restart obligation
///
/// Dropping the last claim of an epoch whose restart never happened closes the
/// epoch, so a later envelope cannot inherit a restart nobody is waiting for.
pub struct RestartClaim<'a> {
    status: &'a ServerStatus,
}

impl Drop for RestartClaim<'_> {
    fn drop(&mut self) {
        let mut state = self.status.restart_state();
        state.owners = state.owners.saturating_sub(1);
        if state.owners == 0 && state.pending {
            state.pending = false;
            warn!(
                server_id = %self.status.id,
                "No envelope left to restart the server, leaving it powered off"
            );
        }
    }
}

/// Keeps one action counted in `in_flight`; decrements on drop
pub struct InFlightGuard<'a> {
    status: &'a ServerStatus,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.status.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        metrics::envelope_left();
    }
}

/// Serializable view of a [`ServerStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub id: String,
    pub in_flight: usize,
    pub deleted: bool,
    pub restart_pending: bool,
    pub restart_owners: usize,
}
