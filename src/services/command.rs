//! # Service commands and the command channel handle.
//!
//! [`ServiceCommand`] is the only way to ask the supervisor to boot or stop a service.
//! [`CommandSender`] is a cheap, cloneable handle to the supervisor's queue; it is
//! handed to the router, the boot tasks, and any external caller.
//!
//! ## Rules
//! - Sending never blocks and never reports the command's outcome (fire-and-forget).
//!   Outcomes surface as log lines and status transitions on the ServiceEvent stream.
//! - The queue is unbounded: the router posts into the same queue that indirectly
//!   triggers it, so a bounded queue could deadlock under a retry storm.
//! - Raw commands (service type as a string) are parsed at the edge; an unknown
//!   type is logged and dropped.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use super::types::{NodeId, ServiceStatus, ServiceType, ALL_NODES};
use crate::error::CommandError;

/// What the supervisor should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CommandKind {
    /// Start (or restart) the service on the resolved nodes.
    Boot,
    /// Stop a running service instance.
    Cancel,
}

/// One message on the supervisor's command queue.
///
/// `node_id == 0` ([`ALL_NODES`]) asks the supervisor to resolve eligible nodes itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    pub kind: CommandKind,
    pub service: ServiceType,
    pub node_id: NodeId,
    /// Overrides node eligibility for this boot (`Active` forces, `Inactive` suppresses).
    pub enforced_status: Option<ServiceStatus>,
    /// Defers the boot by this long.
    pub delay: Option<Duration>,
    /// Restart immediately when the booted body exits.
    pub no_delay: bool,
}

impl ServiceCommand {
    /// Boot `service` on `node_id` (or on every eligible node for [`ALL_NODES`]).
    pub fn boot(service: ServiceType, node_id: NodeId) -> Self {
        Self {
            kind: CommandKind::Boot,
            service,
            node_id,
            enforced_status: None,
            delay: None,
            no_delay: false,
        }
    }

    /// Boot `service` on every eligible node.
    pub fn boot_all(service: ServiceType) -> Self {
        Self::boot(service, ALL_NODES)
    }

    /// Stop `service` on `node_id`.
    pub fn cancel(service: ServiceType, node_id: NodeId) -> Self {
        Self {
            kind: CommandKind::Cancel,
            ..Self::boot(service, node_id)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_secs(self, secs: u64) -> Self {
        self.with_delay(Duration::from_secs(secs))
    }

    pub fn with_enforced_status(mut self, status: ServiceStatus) -> Self {
        self.enforced_status = Some(status);
        self
    }

    pub fn with_no_delay(mut self) -> Self {
        self.no_delay = true;
        self
    }

    /// True when the supervisor must resolve nodes dynamically.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.node_id == ALL_NODES
    }
}

/// Command as received from outside the process (e.g. JSON from an API).
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    pub kind: CommandKind,
    pub service_type: String,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub no_delay: bool,
    #[serde(default)]
    pub enforced_status: Option<ServiceStatus>,
}

impl TryFrom<RawCommand> for ServiceCommand {
    type Error = CommandError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let service: ServiceType = raw.service_type.parse()?;
        let mut cmd = ServiceCommand {
            kind: raw.kind,
            service,
            node_id: raw.node_id,
            enforced_status: raw.enforced_status,
            delay: raw.delay_seconds.map(Duration::from_secs),
            no_delay: raw.no_delay,
        };
        if raw.kind == CommandKind::Cancel {
            cmd.delay = None;
        }
        Ok(cmd)
    }
}

/// Cloneable handle to the supervisor's command queue.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ServiceCommand>,
}

impl CommandSender {
    /// Creates a handle and the receiving end consumed by the supervisor.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues a command.
    pub fn send(&self, cmd: ServiceCommand) -> Result<(), CommandError> {
        self.tx.send(cmd).map_err(|_| CommandError::Closed)
    }

    /// Enqueues a Boot command for one service/node pair, logging if the queue is closed.
    pub fn boot(&self, service: ServiceType, node_id: NodeId) {
        if let Err(e) = self.send(ServiceCommand::boot(service, node_id)) {
            warn!(%service, node_id, error = %e, "dropping boot command");
        }
    }

    /// Parses and enqueues an external command.
    ///
    /// Unknown service types are logged and dropped.
    pub fn submit_raw(&self, raw: RawCommand) -> Result<(), CommandError> {
        let name = raw.service_type.clone();
        match ServiceCommand::try_from(raw) {
            Ok(cmd) => self.send(cmd),
            Err(e) => {
                warn!(service_type = %name, error = %e, "dropping malformed service command");
                Err(e)
            }
        }
    }
}
