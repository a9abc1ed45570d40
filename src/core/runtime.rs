//! # Runtime: process root of nodevisor.
//!
//! [`Runtime`] owns the shared state (status registry, event bus, root cancellation
//! token) and, once [`run`](Runtime::run) is called, every long-lived loop:
//!
//! ```text
//! Runtime::run()
//!   ├─ subscriber listener: Bus ──► SubscriberSet (LogWriter, user subscribers)
//!   ├─ DelayedScheduler  (tick) ──► due queue ─────────────┐
//!   ├─ StatusDetector    (tick) ──► StatusRouter ──► CommandSender
//!   │                         └──► Bus                      │
//!   ├─ core bootstrap: CoreService Pending ─► Initializing  ▼
//!   └─ Supervisor::run ◄──────────────── command queue ◄────┘
//!        │
//!        ├─ OS signal ──► ShutdownRequested ──► cancel root ──► drain within grace
//!        └─ core service dead ──► CoreServiceDied ──► cancel root ──► Err(CoreServiceDied)
//! ```
//!
//! ## Shutdown
//! Cancelling the root token (OS signal, [`Runtime::shutdown_token`], or the fatal
//! path) cancels every boot task and loop. Boot tasks get `grace` to finish; stuck
//! services are reported in [`RuntimeError::GraceExceeded`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::detector::StatusDetector;
use super::router::{FatalPath, StatusRouter};
use super::scheduler::DelayedScheduler;
use super::shutdown;
use super::supervisor::{ServiceBodies, Supervisor, SupervisorParams};
use crate::collaborators::{CacheWarmer, ConnectionFactory, NodeDirectory};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::services::{
    CommandSender, DelayedQueue, ServiceCommand, ServiceSnapshot, ServiceStatus, ServiceType,
    StatusRegistry, DUMMY_NODE_ID,
};
use crate::subscribers::SubscriberSet;
use crate::triggers::TriggerRegistry;

/// Parts assembled by [`RuntimeBuilder`](super::RuntimeBuilder).
pub(crate) struct RuntimeParts {
    pub cfg: Config,
    pub directory: Arc<dyn NodeDirectory>,
    pub connector: Arc<dyn ConnectionFactory>,
    pub bodies: ServiceBodies,
    pub warmers: Vec<Arc<dyn CacheWarmer>>,
    pub bus: Bus,
    pub subs: Arc<SubscriberSet>,
    pub fatal_hook: Option<super::router::FatalHook>,
    pub bootstrap_core: bool,
}

/// Supervision root for all node and singleton services.
pub struct Runtime {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Arc<StatusRegistry>,
    commands: CommandSender,
    commands_rx: mpsc::UnboundedReceiver<ServiceCommand>,
    directory: Arc<dyn NodeDirectory>,
    connector: Arc<dyn ConnectionFactory>,
    bodies: ServiceBodies,
    warmers: Vec<Arc<dyn CacheWarmer>>,
    fatal: Arc<FatalPath>,
    root: CancellationToken,
    triggers: TriggerRegistry,
    bootstrap_core: bool,
}

enum Stop {
    Finished(Result<(), RuntimeError>),
    Signal(std::io::Result<&'static str>),
}

impl Runtime {
    pub(crate) fn from_parts(p: RuntimeParts) -> Self {
        let root = CancellationToken::new();
        let (commands, commands_rx) = CommandSender::channel();
        let fatal = Arc::new(FatalPath::new(p.bus.clone(), root.clone(), p.fatal_hook));
        let triggers = TriggerRegistry::spawn(p.cfg.registry_capacity_clamped(), root.clone());
        Self {
            cfg: p.cfg,
            bus: p.bus,
            subs: p.subs,
            registry: StatusRegistry::new(),
            commands,
            commands_rx,
            directory: p.directory,
            connector: p.connector,
            bodies: p.bodies,
            warmers: p.warmers,
            fatal,
            root,
            triggers,
            bootstrap_core: p.bootstrap_core,
        }
    }

    /// Handle for enqueueing service commands (fire-and-forget).
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    /// Receiver of every bus event, including each observed status change.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Token that stops the runtime when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Sorted view of every service record.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.registry.snapshot()
    }

    /// Handle to the trigger executor registry.
    pub fn triggers(&self) -> TriggerRegistry {
        self.triggers.clone()
    }

    /// Runs until the root token is cancelled, a termination signal arrives, or the
    /// core service dies.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let listener_stop = CancellationToken::new();
        let listener = self.subscriber_listener(listener_stop.clone());

        let delayed = Arc::new(DelayedQueue::new());
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let (route_tx, route_rx) = mpsc::unbounded_channel();

        let router = StatusRouter::new(
            Arc::clone(&self.registry),
            self.commands.clone(),
            self.warmers.clone(),
            self.cfg.retry_delay,
            Arc::clone(&self.fatal),
        );
        tokio::spawn(router.run(route_rx, self.root.clone()));

        let detector = StatusDetector::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.directory),
            self.bus.clone(),
            route_tx,
        );
        tokio::spawn(detector.run(self.cfg.tick, self.root.clone()));

        let scheduler = DelayedScheduler::new(Arc::clone(&delayed), due_tx, self.cfg.tick);
        tokio::spawn(scheduler.run(self.root.clone()));

        let supervisor = Supervisor::new(SupervisorParams {
            cfg: self.cfg.clone(),
            registry: Arc::clone(&self.registry),
            directory: Arc::clone(&self.directory),
            connector: Arc::clone(&self.connector),
            bodies: self.bodies.clone(),
            delayed,
            commands: self.commands.clone(),
            bus: self.bus.clone(),
            root: self.root.clone(),
        });

        if self.bootstrap_core {
            self.boot_core();
        }

        let sup = supervisor.run(self.commands_rx, due_rx);
        tokio::pin!(sup);

        let stop = tokio::select! {
            res = &mut sup => Stop::Finished(res),
            sig = shutdown::wait_for_shutdown_signal() => Stop::Signal(sig),
        };

        let res = match stop {
            Stop::Finished(res) => res,
            Stop::Signal(Ok(name)) => {
                info!(signal = name, "shutdown requested");
                self.bus.publish(Event::new(EventKind::ShutdownRequested).with_reason(name));
                self.root.cancel();
                sup.await
            }
            Stop::Signal(Err(e)) => {
                error!(error = %e, "failed to install signal handlers");
                self.root.cancel();
                let _ = sup.await;
                return Err(RuntimeError::Signal(e));
            }
        };

        self.root.cancel();
        listener_stop.cancel();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        if let Ok(subs) = Arc::try_unwrap(self.subs) {
            subs.shutdown().await;
        }

        if self.fatal.has_fired() {
            return Err(RuntimeError::CoreServiceDied);
        }
        res
    }

    /// The core service has no body; the runtime itself is its boot task.
    fn boot_core(&self) {
        let core = ServiceType::CoreService;
        self.registry.set_status(core, DUMMY_NODE_ID, ServiceStatus::Pending);
        self.registry.mark_booted(core, DUMMY_NODE_ID);
        self.registry
            .set_status(core, DUMMY_NODE_ID, ServiceStatus::Initializing);
        info!("core service booted");
    }

    /// Subscribes to the bus and forwards events to the subscriber set.
    ///
    /// On `stop`, events already on the bus are forwarded before the task exits.
    fn subscriber_listener(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        if self.subs.is_empty() {
            return None;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit_arc(Arc::new(ev)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit_arc(Arc::new(ev));
                        }
                        break;
                    }
                }
            }
        }))
    }
}
