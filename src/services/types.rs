//! # Service identity and lifecycle vocabulary.
//!
//! - [`ServiceType`] names every supervised service and knows whether it is
//!   node-scoped or a singleton, and whether booting it needs a node connection.
//! - [`ServiceStatus`] is the lifecycle of one service record.
//! - [`SubscriptionStream`] names the fine-grained sub-streams of the node-link service.
//!
//! ## Lifecycle
//! ```text
//! Inactive ──► Pending ──► Initializing ──► Active
//!    ▲            │              │             │
//!    └────────────┴──────────────┴─────────────┤
//!                                              ▼
//!                         BootRequested / BootRequestedWithDelay / TimedOut
//!                                              │
//!                                              └──► Pending (next boot cycle)
//! ```
//! Within one boot cycle the status only moves forward. A cycle ends by falling back
//! to `Inactive` or by one of the boot-request signals, which the router turns into
//! a new Boot command.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Internal node identifier.
pub type NodeId = i64;

/// Node id used in commands to mean "resolve all eligible nodes".
pub const ALL_NODES: NodeId = 0;

/// Reserved node id under which singleton services are recorded.
pub const DUMMY_NODE_ID: NodeId = -1000;

/// Every service the supervisor knows how to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    /// Foundational per-node service (event subscriptions of one Lightning node).
    NodeLinkService,
    /// First ping integration, booted only for nodes that enabled it.
    PingServiceA,
    /// Second ping integration, booted only for nodes that enabled it.
    PingServiceB,
    /// Per-node rebalancer host.
    RebalanceService,
    /// Per-node outbound communication service.
    CommunicationService,
    /// Process root. Its death is fatal.
    CoreService,
    /// Workflow automation (trigger monitors).
    AutomationService,
    /// Periodic housekeeping.
    MaintenanceService,
    /// Cron-style scheduled jobs.
    CronService,
}

impl ServiceType {
    /// All service types in a stable order.
    pub const ALL: [ServiceType; 9] = [
        ServiceType::NodeLinkService,
        ServiceType::PingServiceA,
        ServiceType::PingServiceB,
        ServiceType::RebalanceService,
        ServiceType::CommunicationService,
        ServiceType::CoreService,
        ServiceType::AutomationService,
        ServiceType::MaintenanceService,
        ServiceType::CronService,
    ];

    /// Singleton services, recorded under [`DUMMY_NODE_ID`].
    pub const SINGLETONS: [ServiceType; 4] = [
        ServiceType::CoreService,
        ServiceType::MaintenanceService,
        ServiceType::CronService,
        ServiceType::AutomationService,
    ];

    /// Node-scoped services, in the order the detector walks them.
    pub const NODE_SCOPED: [ServiceType; 5] = [
        ServiceType::NodeLinkService,
        ServiceType::RebalanceService,
        ServiceType::PingServiceA,
        ServiceType::PingServiceB,
        ServiceType::CommunicationService,
    ];

    /// Services that depend on a live node-link service for the same node.
    pub const NODE_LINK_DEPENDENTS: [ServiceType; 3] = [
        ServiceType::RebalanceService,
        ServiceType::PingServiceA,
        ServiceType::PingServiceB,
    ];

    /// Singleton dependents booted once the core service is active.
    pub const CORE_DEPENDENTS: [ServiceType; 3] = [
        ServiceType::MaintenanceService,
        ServiceType::AutomationService,
        ServiceType::CronService,
    ];

    /// True for services keyed by the dummy node id.
    #[inline]
    pub fn is_singleton(self) -> bool {
        Self::SINGLETONS.contains(&self)
    }

    /// True if the boot body needs a connection to the node before running.
    #[inline]
    pub fn requires_connection(self) -> bool {
        matches!(
            self,
            ServiceType::NodeLinkService
                | ServiceType::PingServiceA
                | ServiceType::PingServiceB
                | ServiceType::RebalanceService
        )
    }

    /// Stable name used in logs and in raw commands.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::NodeLinkService => "NodeLinkService",
            ServiceType::PingServiceA => "PingServiceA",
            ServiceType::PingServiceB => "PingServiceB",
            ServiceType::RebalanceService => "RebalanceService",
            ServiceType::CommunicationService => "CommunicationService",
            ServiceType::CoreService => "CoreService",
            ServiceType::AutomationService => "AutomationService",
            ServiceType::MaintenanceService => "MaintenanceService",
            ServiceType::CronService => "CronService",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CommandError::UnknownServiceType(s.to_string()))
    }
}

/// Lifecycle status of one service record.
///
/// Serialized by variant name, the same text as its `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Not running.
    #[default]
    Inactive,
    /// Boot accepted, body not started yet.
    Pending,
    /// Body is warming up.
    Initializing,
    /// Body is serving.
    Active,
    /// Body exited; restart immediately.
    BootRequested,
    /// Body exited; restart after the standard retry delay.
    BootRequestedWithDelay,
    /// Body did not stop within the shutdown grace period.
    TimedOut,
}

impl ServiceStatus {
    /// Position inside a boot cycle, `None` for cycle-ending signals.
    fn rank(self) -> Option<u8> {
        match self {
            ServiceStatus::Inactive => Some(0),
            ServiceStatus::Pending => Some(1),
            ServiceStatus::Initializing => Some(2),
            ServiceStatus::Active => Some(3),
            _ => None,
        }
    }

    /// True for statuses that end a boot cycle.
    #[inline]
    pub fn ends_cycle(self) -> bool {
        self.rank().is_none() || self == ServiceStatus::Inactive
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// Forward moves inside a cycle are allowed, as is ending the cycle from anywhere.
    /// A new cycle may only start from a cycle-ending status.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        if self == next {
            return true;
        }
        if next.ends_cycle() {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(0), Some(_)) | (None, Some(_)) => true,
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Inactive => "Inactive",
            ServiceStatus::Pending => "Pending",
            ServiceStatus::Initializing => "Initializing",
            ServiceStatus::Active => "Active",
            ServiceStatus::BootRequested => "BootRequested",
            ServiceStatus::BootRequestedWithDelay => "BootRequestedWithDelay",
            ServiceStatus::TimedOut => "TimedOut",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained streams run inside the node-link service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionStream {
    TransactionStream,
    HtlcEventStream,
    ChannelEventStream,
    GraphEventStream,
    ForwardStream,
    InvoiceStream,
    PaymentStream,
    InFlightPaymentStream,
    PeerEventStream,
    ChannelBalanceCacheStream,
}

impl SubscriptionStream {
    pub const ALL: [SubscriptionStream; 10] = [
        SubscriptionStream::TransactionStream,
        SubscriptionStream::HtlcEventStream,
        SubscriptionStream::ChannelEventStream,
        SubscriptionStream::GraphEventStream,
        SubscriptionStream::ForwardStream,
        SubscriptionStream::InvoiceStream,
        SubscriptionStream::PaymentStream,
        SubscriptionStream::InFlightPaymentStream,
        SubscriptionStream::PeerEventStream,
        SubscriptionStream::ChannelBalanceCacheStream,
    ];

    /// Streams whose data feeds the channel balance cache.
    pub fn feeds_channel_balance_cache(self) -> bool {
        matches!(
            self,
            SubscriptionStream::ForwardStream
                | SubscriptionStream::InvoiceStream
                | SubscriptionStream::PaymentStream
                | SubscriptionStream::PeerEventStream
                | SubscriptionStream::ChannelEventStream
                | SubscriptionStream::GraphEventStream
                | SubscriptionStream::HtlcEventStream
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStream::TransactionStream => "TransactionStream",
            SubscriptionStream::HtlcEventStream => "HtlcEventStream",
            SubscriptionStream::ChannelEventStream => "ChannelEventStream",
            SubscriptionStream::GraphEventStream => "GraphEventStream",
            SubscriptionStream::ForwardStream => "ForwardStream",
            SubscriptionStream::InvoiceStream => "InvoiceStream",
            SubscriptionStream::PaymentStream => "PaymentStream",
            SubscriptionStream::InFlightPaymentStream => "InFlightPaymentStream",
            SubscriptionStream::PeerEventStream => "PeerEventStream",
            SubscriptionStream::ChannelBalanceCacheStream => "ChannelBalanceCacheStream",
        }
    }
}

impl fmt::Display for SubscriptionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
