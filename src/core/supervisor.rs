//! # Supervisor: command loop, node resolution, and boot tasks.
//!
//! The supervisor is the only consumer of the service command queue. It resolves the
//! nodes each command applies to, takes per-record boot locks, and spawns one boot
//! task per node. Boot tasks connect (when the service needs a node connection), run
//! the registered [`ServiceBody`](crate::ServiceBody), and record every outcome in the
//! [`StatusRegistry`].
//!
//! ## Architecture
//! ```text
//! CommandSender ──► [unbounded queue] ──┐
//!                                       ├──► Supervisor::run (select loop)
//! DelayedScheduler ──► [due queue] ─────┘          │
//!                                                  ├─ Cancel ──► registry.cancel()
//!                                                  ├─ Boot ────► resolve nodes
//!                                                  │               ├─ [] ────────► drop / remove_subscription
//!                                                  │               ├─ delay ─────► DelayedQueue
//!                                                  │               └─ nodes ─────► try_acquire_boot_lock
//!                                                  │                                 ├─ held ──► "already booting"
//!                                                  │                                 └─ won ───► JoinSet::spawn(boot)
//!                                                  └─ root cancelled ──► drain JoinSet within grace
//!
//! boot(node):
//!   register_cancel ─► Pending ─► connect? ─┬─ Err ─► cascade (node link) ─► Inactive ─► delayed retry
//!                                          └─ Ok ──► mark_booted ─► body.run(ctx)
//!                                                                    └─► exit ─► BootRequested[WithDelay]
//! ```
//!
//! ## Rules
//! - The loop never waits on a boot lock; contention is logged and skipped.
//! - The boot lock is held for the whole life of a boot task, so at most one body runs
//!   per `(service, node)` record.
//! - Nothing crosses the command channel back to the caller; outcomes are log lines and
//!   status transitions.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ConnectionFactory, NodeDescriptor, NodeDirectory, NodeFilter, PingSystem};
use crate::config::Config;
use crate::error::{RuntimeError, ServiceError};
use crate::events::{Bus, Event, EventKind};
use crate::services::{
    BootGuard, CommandKind, CommandSender, DelayedCommand, DelayedQueue, ServiceBodyRef,
    ServiceCommand, ServiceContext, ServiceStatus, ServiceType, StatusRegistry, DUMMY_NODE_ID,
};

/// Service bodies by type.
pub(crate) type ServiceBodies = HashMap<ServiceType, ServiceBodyRef>;

/// Everything the supervisor and its boot tasks share.
pub(crate) struct Supervisor {
    cfg: Config,
    registry: Arc<StatusRegistry>,
    directory: Arc<dyn NodeDirectory>,
    connector: Arc<dyn ConnectionFactory>,
    bodies: ServiceBodies,
    delayed: Arc<DelayedQueue>,
    commands: CommandSender,
    bus: Bus,
    root: CancellationToken,
}

pub(crate) struct SupervisorParams {
    pub cfg: Config,
    pub registry: Arc<StatusRegistry>,
    pub directory: Arc<dyn NodeDirectory>,
    pub connector: Arc<dyn ConnectionFactory>,
    pub bodies: ServiceBodies,
    pub delayed: Arc<DelayedQueue>,
    pub commands: CommandSender,
    pub bus: Bus,
    pub root: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(p: SupervisorParams) -> Arc<Self> {
        Arc::new(Self {
            cfg: p.cfg,
            registry: p.registry,
            directory: p.directory,
            connector: p.connector,
            bodies: p.bodies,
            delayed: p.delayed,
            commands: p.commands,
            bus: p.bus,
            root: p.root,
        })
    }

    /// Runs the command loop until the root token is cancelled, then drains boot tasks.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
        mut due: mpsc::UnboundedReceiver<DelayedCommand>,
    ) -> Result<(), RuntimeError> {
        let mut set: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                Some(joined) = set.join_next(), if !set.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "boot task aborted");
                    }
                }
                Some(cmd) = due.recv() => {
                    debug!(service = %cmd.name, nodes = cmd.nodes.len(), "delayed command due");
                    self.launch(&cmd.command, cmd.nodes, &mut set);
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd, &mut set).await,
                    None => break,
                },
            }
        }

        self.wait_all_with_grace(&mut set).await
    }

    /// Processes one command.
    pub(crate) async fn handle(self: &Arc<Self>, cmd: ServiceCommand, set: &mut JoinSet<()>) {
        let service = cmd.service;
        if cmd.kind == CommandKind::Cancel {
            let node_id = if service.is_singleton() { DUMMY_NODE_ID } else { cmd.node_id };
            let cancelled = self
                .registry
                .cancel(service, node_id, cmd.enforced_status, cmd.no_delay);
            info!(%service, node_id, cancelled, "cancel requested");
            return;
        }

        debug!(%service, node_id = cmd.node_id, "verifying requirement");
        let nodes = match self.resolve(&cmd).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(%service, node_id = cmd.node_id, error = %e, "getting connection details failed; dropping command");
                return;
            }
        };

        if nodes.is_empty() {
            info!(%service, node_id = cmd.node_id, "no eligible nodes");
            if !cmd.is_dynamic() {
                self.registry.remove_subscription(service, cmd.node_id);
            }
            return;
        }

        if let Some(delay) = cmd.delay {
            info!(%service, node_id = cmd.node_id, delay_secs = delay.as_secs(), "deferring boot");
            self.delayed.push(DelayedCommand {
                name: service.to_string(),
                fire_at: Instant::now() + delay,
                command: cmd,
                nodes,
            });
            return;
        }

        self.launch(&cmd, nodes, set);
    }

    /// Resolves the nodes a Boot command applies to.
    ///
    /// A stored enforced status is consumed whenever a specific node is addressed;
    /// an override carried by the command wins over it.
    async fn resolve(&self, cmd: &ServiceCommand) -> anyhow::Result<Vec<NodeDescriptor>> {
        let service = cmd.service;
        if service.is_singleton() {
            return Ok(vec![NodeDescriptor::dummy()]);
        }

        if cmd.is_dynamic() {
            if service == ServiceType::NodeLinkService {
                self.activate_core();
            }
            return self.directory.active_nodes(node_filter(service)).await;
        }

        let stored = self.registry.take_enforced_status(service, cmd.node_id);
        let enforced = cmd.enforced_status.or(stored);
        if enforced == Some(ServiceStatus::Inactive) {
            return Ok(Vec::new());
        }

        let Some(node) = self.directory.node(cmd.node_id).await? else {
            return Ok(Vec::new());
        };
        if enforced == Some(ServiceStatus::Active) {
            return Ok(vec![node]);
        }
        if node.active && node.matches(node_filter(service)) {
            Ok(vec![node])
        } else {
            Ok(Vec::new())
        }
    }

    /// Marks the core service active the first time node links are booted dynamically.
    fn activate_core(&self) {
        let core = ServiceType::CoreService;
        match self.registry.status(core, DUMMY_NODE_ID) {
            ServiceStatus::Pending | ServiceStatus::Initializing => {
                self.registry.mark_booted(core, DUMMY_NODE_ID);
                self.registry.set_status(core, DUMMY_NODE_ID, ServiceStatus::Active);
            }
            _ => {}
        }
    }

    /// Takes boot locks and spawns one boot task per resolved node.
    fn launch(self: &Arc<Self>, cmd: &ServiceCommand, nodes: Vec<NodeDescriptor>, set: &mut JoinSet<()>) {
        let service = cmd.service;
        let Some(body) = self.bodies.get(&service).cloned() else {
            warn!(%service, "no service body registered; dropping boot");
            return;
        };

        for node in nodes {
            let node_id = node.node_id;
            match self.registry.try_acquire_boot_lock(service, node_id) {
                Some(guard) => {
                    let me = Arc::clone(self);
                    set.spawn(me.boot(node, cmd.clone(), Arc::clone(&body), guard));
                }
                None => warn!(%service, node_id, "requested start failed; already booting"),
            }
        }
    }

    async fn boot(self: Arc<Self>, node: NodeDescriptor, cmd: ServiceCommand, body: ServiceBodyRef, guard: BootGuard) {
        let service = cmd.service;
        let node_id = node.node_id;
        let token = self.root.child_token();

        info!(%service, node_id, "generating service");
        self.registry.register_cancel(service, node_id, token.clone());
        self.registry.set_status(service, node_id, ServiceStatus::Pending);

        let connection = if service.requires_connection() {
            let attempt = tokio::select! {
                _ = token.cancelled() => None,
                res = self.connector.connect(&node) => Some(res),
            };
            match attempt {
                Some(Ok(conn)) => Some(conn),
                Some(Err(e)) => {
                    guard.release();
                    let err = ServiceError::Connection { error: format!("{e:#}") };
                    self.connection_failed(service, node_id, &err);
                    return;
                }
                None => {
                    self.finish(&cmd, node_id, guard);
                    return;
                }
            }
        } else {
            None
        };

        self.registry.mark_booted(service, node_id);
        info!(%service, node_id, body = body.name(), "service booted");

        let ctx = ServiceContext::new(service, node_id, token, connection, Arc::clone(&self.registry));
        let res = match std::panic::AssertUnwindSafe(body.run(ctx)).catch_unwind().await {
            Ok(res) => res,
            Err(_) => Err(ServiceError::fail("service body panicked")),
        };
        match res {
            Err(e) if e.is_retryable() => error!(%service, node_id, error = %e, label = e.as_label(), "service ended"),
            Ok(()) | Err(_) => info!(%service, node_id, "service stopped"),
        }

        self.finish(&cmd, node_id, guard);
    }

    /// Connection failure: tear down dependents first, then the service itself, then retry later.
    fn connection_failed(&self, service: ServiceType, node_id: i64, err: &ServiceError) {
        error!(%service, node_id, error = %err, label = err.as_label(), "failed to connect to node");

        if service == ServiceType::NodeLinkService {
            for dep in ServiceType::NODE_LINK_DEPENDENTS {
                self.registry
                    .cancel(dep, node_id, Some(ServiceStatus::Inactive), false);
            }
            self.registry.reset_streams(node_id);
        }
        self.registry.remove_subscription(service, node_id);

        if self.root.is_cancelled() {
            return;
        }
        info!(%service, node_id, delay_secs = self.cfg.retry_delay_secs(), "service will be restarted when eligible");
        let retry = ServiceCommand::boot(service, node_id).with_delay(self.cfg.retry_delay);
        if let Err(e) = self.commands.send(retry) {
            warn!(%service, node_id, error = %e, "dropping connection retry");
        }
    }

    /// Body exit: release the record and request the next boot.
    fn finish(&self, cmd: &ServiceCommand, node_id: i64, guard: BootGuard) {
        let service = cmd.service;
        drop(self.registry.take_cancel(service, node_id));
        if service == ServiceType::NodeLinkService {
            self.registry.reset_streams(node_id);
        }
        guard.release();

        if self.root.is_cancelled() {
            self.registry.set_status(service, node_id, ServiceStatus::Inactive);
            return;
        }

        let no_delay = self.registry.take_no_delay(service, node_id) || cmd.no_delay;
        let next = if no_delay {
            ServiceStatus::BootRequested
        } else {
            ServiceStatus::BootRequestedWithDelay
        };
        info!(%service, node_id, no_delay, "service will be restarted when eligible");
        self.registry.set_status(service, node_id, next);
    }

    /// Waits for all boot tasks to finish within the configured grace period.
    async fn wait_all_with_grace(&self, set: &mut JoinSet<()>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        if grace.is_zero() {
            set.abort_all();
            return Ok(());
        }
        let done = async { while set.join_next().await.is_some() {} };

        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.registry.running();
                self.registry.time_out_running();
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

fn node_filter(service: ServiceType) -> NodeFilter {
    match service {
        ServiceType::PingServiceA => NodeFilter::PingSystem(PingSystem::A),
        ServiceType::PingServiceB => NodeFilter::PingSystem(PingSystem::B),
        _ => NodeFilter::All,
    }
}
