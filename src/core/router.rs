//! # Status event router.
//!
//! Turns status changes into new service commands. This is the one place the service
//! dependency graph is encoded:
//!
//! | Service | New status | Reaction |
//! |---|---|---|
//! | core | `Initializing` | warm caches, then boot node links on every eligible node |
//! | core | `Active` | boot maintenance, automation, cron |
//! | core | `Inactive` | fatal: shut the runtime down (once) |
//! | node link (no stream) | `Active` | boot rebalance and both ping services unless already active |
//! | any (no stream) | `BootRequested` | boot the same record now |
//! | any (no stream) | `BootRequestedWithDelay` | boot the same record after `retry_delay` |
//!
//! The router posts into the same unbounded command queue whose effects it observes,
//! so it never waits on the supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::CacheWarmer;
use crate::events::{Bus, Event, EventKind, ServiceEvent};
use crate::services::{
    CommandSender, ServiceCommand, ServiceStatus, ServiceType, StatusRegistry, DUMMY_NODE_ID,
};

/// Callback run when the core service dies.
pub type FatalHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Process termination path; fires at most once.
pub(crate) struct FatalPath {
    fired: AtomicBool,
    bus: Bus,
    root: CancellationToken,
    hook: Option<FatalHook>,
}

impl FatalPath {
    pub(crate) fn new(bus: Bus, root: CancellationToken, hook: Option<FatalHook>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            bus,
            root,
            hook,
        }
    }

    /// Publishes `CoreServiceDied`, runs the hook, and cancels the runtime.
    ///
    /// Returns `false` if the path already fired.
    pub(crate) fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        error!("core service is dead and cannot be restarted; terminating");
        self.bus.publish(Event::new(EventKind::CoreServiceDied));
        if let Some(hook) = &self.hook {
            hook();
        }
        self.root.cancel();
        true
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

pub(crate) struct StatusRouter {
    registry: Arc<StatusRegistry>,
    commands: CommandSender,
    warmers: Vec<Arc<dyn CacheWarmer>>,
    retry_delay: Duration,
    fatal: Arc<FatalPath>,
}

impl StatusRouter {
    pub(crate) fn new(
        registry: Arc<StatusRegistry>,
        commands: CommandSender,
        warmers: Vec<Arc<dyn CacheWarmer>>,
        retry_delay: Duration,
        fatal: Arc<FatalPath>,
    ) -> Self {
        Self {
            registry,
            commands,
            warmers,
            retry_delay,
            fatal,
        }
    }

    pub(crate) async fn run(self, mut events: mpsc::UnboundedReceiver<ServiceEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                ev = events.recv() => match ev {
                    Some(ev) => self.route(&ev).await,
                    None => return,
                },
            }
        }
    }

    /// Applies the reaction table to one status change.
    pub(crate) async fn route(&self, ev: &ServiceEvent) {
        debug!(
            service = %ev.service,
            stream = ?ev.stream,
            from = %ev.previous,
            to = %ev.status,
            node_id = ev.node_id,
            "routing status change"
        );

        if ev.service == ServiceType::CoreService {
            self.route_core(ev.status).await;
        }

        if ev.stream.is_some() {
            return;
        }

        if ev.service == ServiceType::NodeLinkService && ev.status == ServiceStatus::Active {
            for dep in ServiceType::NODE_LINK_DEPENDENTS {
                if self.registry.status(dep, ev.node_id) != ServiceStatus::Active {
                    debug!(service = %dep, node_id = ev.node_id, "booting node link dependent");
                    self.send(ServiceCommand::boot(dep, ev.node_id));
                }
            }
        }

        match ev.status {
            ServiceStatus::BootRequestedWithDelay => {
                info!(
                    service = %ev.service,
                    node_id = ev.node_id,
                    delay_secs = self.retry_delay.as_secs(),
                    "service will be restarted when eligible"
                );
                self.send(ServiceCommand::boot(ev.service, ev.node_id).with_delay(self.retry_delay));
            }
            ServiceStatus::BootRequested => {
                info!(service = %ev.service, node_id = ev.node_id, "service will be restarted when eligible");
                self.send(ServiceCommand::boot(ev.service, ev.node_id));
            }
            _ => {}
        }
    }

    async fn route_core(&self, status: ServiceStatus) {
        match status {
            ServiceStatus::Inactive => {
                self.fatal.trigger();
            }
            ServiceStatus::Pending => info!("core service is booting"),
            ServiceStatus::Initializing => {
                info!("core service is initializing; loading caches in memory");
                for warmer in &self.warmers {
                    if let Err(e) = warmer.warm().await {
                        error!(cache = warmer.name(), error = %e, "failed to warm cache");
                    }
                }
                self.send(ServiceCommand::boot_all(ServiceType::NodeLinkService));
            }
            ServiceStatus::Active => {
                for dep in ServiceType::CORE_DEPENDENTS {
                    debug!(service = %dep, "booting core dependent");
                    self.send(ServiceCommand::boot(dep, DUMMY_NODE_ID));
                }
            }
            _ => {}
        }
    }

    fn send(&self, cmd: ServiceCommand) {
        if let Err(e) = self.commands.send(cmd) {
            warn!(error = %e, "dropping routed command");
        }
    }
}
