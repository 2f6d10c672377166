//! Common test utilities
//!
//! [`MockBackend`] is a scripted in-memory cloud API. It records every call,
//! panics when two control-plane transitions overlap on the same server, and
//! offers [`MockBackend::check_action`] for actions that must only run while
//! their server is powered off.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use powercycle::backend::{Backend, BackendError, BackendResult, Server};
use tokio_util::sync::CancellationToken;

/// A call observed by the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetServer(String),
    Start(String),
    Shutdown(String),
    Stop(String),
    Delete(String),
    List,
    Action(String),
}

/// How `shutdown_server` behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Guest powers off after the transition delay
    Graceful,
    /// Guest never acknowledges; blocks until the context fires
    Hang,
    /// API rejects the request with this status
    Reject(u16),
}

#[derive(Default)]
struct MockState {
    /// Power flag per existing server
    servers: HashMap<String, bool>,
    /// Servers with a transition currently executing
    busy: HashSet<String>,
    calls: Vec<Call>,
    /// Status codes returned by upcoming `start_server` calls
    start_failures: Vec<u16>,
    /// Status code returned by every `get_server`
    get_failure: Option<u16>,
}

pub struct MockBackend {
    state: Mutex<MockState>,
    shutdown_mode: Mutex<ShutdownMode>,
    transition_delay: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every transition takes `delay`, widening overlap windows
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            shutdown_mode: Mutex::new(ShutdownMode::Graceful),
            transition_delay: delay,
        }
    }

    pub fn with_server(self, id: &str, power: bool) -> Self {
        self.state().servers.insert(id.to_string(), power);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_shutdown_mode(&self, mode: ShutdownMode) {
        *self.shutdown_mode.lock().unwrap() = mode;
    }

    pub fn fail_next_start(&self, status: u16) {
        self.state().start_failures.push(status);
    }

    pub fn fail_get_server(&self, status: u16) {
        self.state().get_failure = Some(status);
    }

    /// Make the server disappear from the API
    pub fn forget_server(&self, id: &str) {
        self.state().servers.remove(id);
    }

    pub fn power(&self, id: &str) -> Option<bool> {
        self.state().servers.get(id).copied()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Record an offline-required action; fails if the server is powered on
    pub fn check_action(&self, id: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Action(id.to_string()));
        match state.servers.get(id) {
            Some(true) => anyhow::bail!("action on {id} ran while the server was powered on"),
            _ => Ok(()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn begin(&self, id: &str) -> TransitionSlot<'_> {
        let inserted = self.state().busy.insert(id.to_string());
        assert!(inserted, "overlapping transitions on server {id}");
        TransitionSlot {
            backend: self,
            id: id.to_string(),
        }
    }

    fn require(&self, id: &str) -> BackendResult<()> {
        if self.state().servers.contains_key(id) {
            Ok(())
        } else {
            Err(BackendError::from_status(404, format!("server {id} not found")))
        }
    }

    fn set_power(&self, id: &str, power: bool) {
        if let Some(p) = self.state().servers.get_mut(id) {
            *p = power;
        }
    }

    async fn delay(&self, ctx: &CancellationToken) -> BackendResult<()> {
        if self.transition_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = ctx.cancelled() => Err(BackendError::Cancelled),
            _ = tokio::time::sleep(self.transition_delay) => Ok(()),
        }
    }
}

/// Marks a server busy for the duration of one transition
struct TransitionSlot<'a> {
    backend: &'a MockBackend,
    id: String,
}

impl Drop for TransitionSlot<'_> {
    fn drop(&mut self) {
        self.backend.state().busy.remove(&self.id);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn get_server(&self, _ctx: &CancellationToken, id: &str) -> BackendResult<Server> {
        self.record(Call::GetServer(id.to_string()));
        if let Some(status) = self.state().get_failure {
            return Err(BackendError::from_status(status, "get failed"));
        }
        self.require(id)?;
        let power = self.power(id).unwrap_or(false);
        Ok(Server::new(id, power))
    }

    async fn start_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.record(Call::Start(id.to_string()));
        let _slot = self.begin(id);
        self.require(id)?;
        self.delay(ctx).await?;

        let failure = self.state().start_failures.pop();
        if let Some(status) = failure {
            return Err(BackendError::from_status(status, "start failed"));
        }
        self.set_power(id, true);
        Ok(())
    }

    async fn shutdown_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.record(Call::Shutdown(id.to_string()));
        let _slot = self.begin(id);
        self.require(id)?;

        let mode = *self.shutdown_mode.lock().unwrap();
        match mode {
            ShutdownMode::Graceful => {
                self.delay(ctx).await?;
                self.set_power(id, false);
                Ok(())
            }
            ShutdownMode::Hang => {
                ctx.cancelled().await;
                Err(BackendError::Cancelled)
            }
            ShutdownMode::Reject(status) => {
                Err(BackendError::from_status(status, "shutdown rejected"))
            }
        }
    }

    async fn stop_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.record(Call::Stop(id.to_string()));
        let _slot = self.begin(id);
        self.require(id)?;
        self.delay(ctx).await?;
        self.set_power(id, false);
        Ok(())
    }

    async fn delete_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.record(Call::Delete(id.to_string()));
        let _slot = self.begin(id);
        self.require(id)?;
        self.delay(ctx).await?;
        if self.power(id) == Some(true) {
            return Err(BackendError::from_status(424, "server must be powered off"));
        }
        self.forget_server(id);
        Ok(())
    }

    async fn get_server_list(&self, _ctx: &CancellationToken) -> BackendResult<Vec<Server>> {
        self.record(Call::List);
        let mut servers: Vec<Server> = self
            .state()
            .servers
            .iter()
            .map(|(id, power)| Server::new(id.clone(), *power))
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }
}
