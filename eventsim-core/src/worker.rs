//! Interception context
//!
//! The interception context is a single task that exclusively owns the
//! endpoint registry. It applies configuration messages from the bus and
//! answers intercepted requests, one at a time, so the registry needs no
//! locking. Other contexts reach it only through the bus or an
//! [`Interceptor`] client.

use crate::bus::{BusSubscription, MessageBus};
use crate::dispatcher::{Dispatcher, InterceptedRequest, Interception};
use crate::error::{Result, SimulatorError};
use crate::registry::{EndpointConfig, Registry};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle state of the interception context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Task spawned, not yet listening
    Installing,
    /// Listening on the bus
    Installed,
    /// Accepting intercepted requests
    Activated,
    /// Shut down; will not answer again
    Redundant,
}

/// Installed/ready signal exposed by an installable worker
pub trait WorkerLifecycle: Send + Sync {
    /// Watch the worker's state
    fn state_watch(&self) -> watch::Receiver<WorkerState>;

    /// Current state
    fn state(&self) -> WorkerState {
        *self.state_watch().borrow()
    }
}

/// Wait until the worker has finished installing.
///
/// Resolves immediately if installation completed earlier; fails if the
/// worker becomes redundant first.
pub async fn wait_until_installed(worker: &dyn WorkerLifecycle) -> Result<()> {
    wait_for(worker, WorkerState::Installed).await
}

/// Wait until the worker is active
pub async fn wait_until_ready(worker: &dyn WorkerLifecycle) -> Result<()> {
    wait_for(worker, WorkerState::Activated).await
}

async fn wait_for(worker: &dyn WorkerLifecycle, target: WorkerState) -> Result<()> {
    let mut states = worker.state_watch();
    let current = *states
        .wait_for(|state| reached(*state, target) || *state == WorkerState::Redundant)
        .await
        .map_err(|_| SimulatorError::Worker("interception context dropped".to_string()))?;
    if current == WorkerState::Redundant {
        return Err(SimulatorError::Worker(
            "interception context became redundant".to_string(),
        ));
    }
    Ok(())
}

fn reached(state: WorkerState, target: WorkerState) -> bool {
    let rank = |s: WorkerState| match s {
        WorkerState::Installing => 0,
        WorkerState::Installed => 1,
        WorkerState::Activated => 2,
        WorkerState::Redundant => 3,
    };
    state != WorkerState::Redundant && rank(state) >= rank(target)
}

enum Command {
    Intercept {
        request: InterceptedRequest,
        reply: oneshot::Sender<Interception>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<EndpointConfig>>,
    },
}

/// Client handle for sending requests into the interception context.
///
/// Stays valid across restarts.
#[derive(Clone, Debug)]
pub struct Interceptor {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Intercept { request, .. } => f.debug_tuple("Intercept").field(request).finish(),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

impl Interceptor {
    /// Hand a request to the interception context
    pub async fn intercept(&self, request: InterceptedRequest) -> Result<Interception> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Intercept { request, reply })
            .await
            .map_err(|_| not_running())?;
        response.await.map_err(|_| not_running())
    }

    /// Copy of the registry, in registration order
    pub async fn registry_snapshot(&self) -> Result<Vec<EndpointConfig>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| not_running())?;
        response.await.map_err(|_| not_running())
    }

    /// Poll the registry until `endpoint_id` is present or `timeout` passes
    pub async fn wait_for_endpoint(&self, endpoint_id: &str, timeout: Duration) -> Result<EndpointConfig> {
        let poll = async {
            loop {
                let snapshot = self.registry_snapshot().await?;
                if let Some(config) = snapshot.into_iter().find(|c| c.endpoint_id == endpoint_id) {
                    return Ok(config);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            SimulatorError::Worker(format!("endpoint {} was never registered", endpoint_id))
        })?
    }
}

fn not_running() -> SimulatorError {
    SimulatorError::Worker("interception context is not running".to_string())
}

/// Owner of the interception context task
pub struct InterceptionWorker {
    bus: MessageBus,
    dispatcher: Dispatcher,
    state: watch::Sender<WorkerState>,
    interceptor: Interceptor,
    shutdown: CancellationToken,
    task: Option<JoinHandle<mpsc::Receiver<Command>>>,
}

impl std::fmt::Debug for InterceptionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionWorker")
            .field("channel", &self.bus.name())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

const COMMAND_BUFFER: usize = 64;

impl InterceptionWorker {
    /// Spawn the interception context, listening on `bus`
    pub fn install(bus: MessageBus, dispatcher: Dispatcher) -> Self {
        let (state, _) = watch::channel(WorkerState::Installing);
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let mut worker = Self {
            bus,
            dispatcher,
            state,
            interceptor: Interceptor { commands },
            shutdown: CancellationToken::new(),
            task: None,
        };
        worker.spawn(receiver);
        worker
    }

    fn spawn(&mut self, commands: mpsc::Receiver<Command>) {
        self.shutdown = CancellationToken::new();
        self.state.send_replace(WorkerState::Installing);
        let context = InterceptionContext {
            registry: Registry::new(),
            dispatcher: self.dispatcher.clone(),
            subscription: self.bus.subscribe(),
            commands,
            shutdown: self.shutdown.clone(),
        };
        self.state.send_replace(WorkerState::Installed);
        info!(channel = %self.bus.name(), "Interception context installed");
        let state = self.state.clone();
        self.task = Some(tokio::spawn(async move {
            state.send_replace(WorkerState::Activated);
            context.run().await
        }));
    }

    /// Client for intercepting requests
    pub fn interceptor(&self) -> Interceptor {
        self.interceptor.clone()
    }

    /// Restart the context with an empty registry.
    ///
    /// Endpoints must be registered again afterwards.
    pub async fn restart(&mut self) -> Result<()> {
        let commands = self.stop().await?;
        info!("Interception context restarting, registry reset");
        self.spawn(commands);
        Ok(())
    }

    /// Stop the context for good
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop().await?;
        self.state.send_replace(WorkerState::Redundant);
        info!("Interception context shut down");
        Ok(())
    }

    async fn stop(&mut self) -> Result<mpsc::Receiver<Command>> {
        let task = self
            .task
            .take()
            .ok_or_else(|| SimulatorError::Worker("interception context already stopped".to_string()))?;
        self.shutdown.cancel();
        task.await
            .map_err(|e| SimulatorError::Worker(format!("interception context failed: {}", e)))
    }
}

impl WorkerLifecycle for InterceptionWorker {
    fn state_watch(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }
}

impl Drop for InterceptionWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct InterceptionContext {
    registry: Registry,
    dispatcher: Dispatcher,
    subscription: BusSubscription,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl InterceptionContext {
    /// Serve until shut down; returns the command queue so a restarted
    /// context can keep serving the same clients.
    async fn run(mut self) -> mpsc::Receiver<Command> {
        let mut bus_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                envelope = self.subscription.recv(), if bus_open => match envelope {
                    Some(envelope) => self.registry.handle_message(&envelope.payload),
                    None => {
                        debug!("Bus closed, no further configuration updates");
                        bus_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        self.commands
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Intercept { request, reply } => {
                let interception = self.dispatcher.dispatch(&self.registry, request);
                // A requester that gave up drops the response and its session
                let _ = reply.send(interception);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusMessage;

    fn setup() -> (MessageBus, InterceptionWorker) {
        let bus = MessageBus::new("test-channel", 16).unwrap();
        let worker = InterceptionWorker::install(bus.clone(), Dispatcher::new(Duration::from_millis(10)));
        (bus, worker)
    }

    #[tokio::test]
    async fn becomes_ready_after_install() {
        let (_bus, worker) = setup();
        wait_until_installed(&worker).await.unwrap();
        wait_until_ready(&worker).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn applies_bus_messages_before_queued_requests() {
        let (bus, worker) = setup();
        wait_until_ready(&worker).await.unwrap();
        let interceptor = worker.interceptor();

        bus.publish("app", &BusMessage::fake_events("/e", vec!["x".into()]))
            .unwrap();
        let interception = interceptor
            .intercept(InterceptedRequest::new("/e"))
            .await
            .unwrap();
        assert!(matches!(interception, Interception::Playback(_)));
    }

    #[tokio::test]
    async fn restart_resets_registry_but_keeps_clients() {
        let (bus, mut worker) = setup();
        wait_until_ready(&worker).await.unwrap();
        let interceptor = worker.interceptor();

        bus.publish("app", &BusMessage::event_source_url("/e")).unwrap();
        interceptor
            .wait_for_endpoint("/e", Duration::from_secs(1))
            .await
            .unwrap();

        worker.restart().await.unwrap();
        wait_until_ready(&worker).await.unwrap();

        assert!(interceptor.registry_snapshot().await.unwrap().is_empty());
        let interception = interceptor
            .intercept(InterceptedRequest::new("/e"))
            .await
            .unwrap();
        assert!(interception.is_pass_through());
    }

    #[tokio::test]
    async fn shutdown_makes_worker_redundant() {
        let (_bus, mut worker) = setup();
        let interceptor = worker.interceptor();
        worker.shutdown().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(wait_until_ready(&worker).await.is_err());
        assert!(matches!(
            interceptor.intercept(InterceptedRequest::new("/e")).await,
            Err(SimulatorError::Worker(_))
        ));
    }
}
