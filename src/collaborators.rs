//! # External collaborators.
//!
//! The runtime owns no persistent state and talks to the outside world only through
//! these interfaces. Every async method returns [`anyhow::Result`]; the runtime turns
//! failures into log lines and status transitions and never propagates them across
//! the command channel.
//!
//! | Trait | Used by |
//! |---|---|
//! | [`NodeDirectory`] | supervisor (node resolution), detector (roster) |
//! | [`ConnectionFactory`] | boot tasks of connection-requiring services |
//! | [`CacheWarmer`] | router, when the core service initializes |
//! | [`ChannelEventSource`] | event trigger monitors |
//! | [`ChannelStateSource`] | bootstrap channel-balance synthesis |
//! | [`WorkflowExecutor`] | trigger monitors and the scheduled-trigger consumer |
//!
//! [`EventBroadcaster`] is an in-process [`ChannelEventSource`] backed by
//! `tokio::sync::broadcast`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::balance::{ChannelBalanceEvent, ChannelEvent, ChannelState};
use crate::services::{NodeId, DUMMY_NODE_ID};
use crate::triggers::{Parameters, WorkflowNode, WorkflowNodeKind};

/// Optional ping integrations a node can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingSystem {
    A,
    B,
}

/// Eligibility filter for [`NodeDirectory::active_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFilter {
    /// Every active node.
    All,
    /// Active nodes that enabled the given ping system.
    PingSystem(PingSystem),
}

/// Everything needed to reach one Lightning node.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub address: String,
    pub credentials: Vec<u8>,
    pub network: String,
    pub active: bool,
    pub ping_systems: Vec<PingSystem>,
}

impl NodeDescriptor {
    /// Active mainnet node without ping systems or credentials.
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
            credentials: Vec::new(),
            network: "mainnet".to_string(),
            active: true,
            ping_systems: Vec::new(),
        }
    }

    /// Placeholder descriptor under which singleton services run.
    pub fn dummy() -> Self {
        Self::new(DUMMY_NODE_ID, "")
    }

    pub fn with_ping_system(mut self, system: PingSystem) -> Self {
        if !self.ping_systems.contains(&system) {
            self.ping_systems.push(system);
        }
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<Vec<u8>>) -> Self {
        self.credentials = credentials.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_ping_system(&self, system: PingSystem) -> bool {
        self.ping_systems.contains(&system)
    }

    /// True if the node passes `filter` (activity is checked separately).
    pub fn matches(&self, filter: NodeFilter) -> bool {
        match filter {
            NodeFilter::All => true,
            NodeFilter::PingSystem(system) => self.has_ping_system(system),
        }
    }
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("node_id", &self.node_id)
            .field("address", &self.address)
            .field("network", &self.network)
            .field("active", &self.active)
            .field("ping_systems", &self.ping_systems)
            .finish_non_exhaustive()
    }
}

/// Source of truth for the managed node roster.
#[async_trait]
pub trait NodeDirectory: Send + Sync + 'static {
    /// Active nodes passing `filter`.
    async fn active_nodes(&self, filter: NodeFilter) -> anyhow::Result<Vec<NodeDescriptor>>;

    /// One node, active or not.
    async fn node(&self, node_id: NodeId) -> anyhow::Result<Option<NodeDescriptor>>;

    /// Every known node id, active or not.
    async fn all_node_ids(&self) -> anyhow::Result<Vec<NodeId>>;

    /// Chain/network the node runs on.
    async fn node_network(&self, node_id: NodeId) -> anyhow::Result<Option<String>> {
        Ok(self.node(node_id).await?.map(|n| n.network))
    }
}

/// Live connection to a node, owned by one boot task.
pub trait NodeConnection: fmt::Debug + Send + Sync + 'static {
    fn node_id(&self) -> NodeId;

    /// Downcast hook for service bodies that know the concrete client type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a node connection.
pub type ConnectionRef = Arc<dyn NodeConnection>;

/// Opens connections for connection-requiring services.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(&self, node: &NodeDescriptor) -> anyhow::Result<ConnectionRef>;
}

/// Populates one in-memory cache while the core service initializes.
#[async_trait]
pub trait CacheWarmer: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn warm(&self) -> anyhow::Result<()>;
}

/// Broadcast source of channel events.
///
/// Dropping a receiver unsubscribes it.
pub trait ChannelEventSource: Send + Sync + 'static {
    fn subscribe_channel_balance(&self) -> broadcast::Receiver<ChannelBalanceEvent>;

    fn subscribe_channel_events(&self) -> broadcast::Receiver<ChannelEvent>;
}

/// Current channel balances of a node.
#[async_trait]
pub trait ChannelStateSource: Send + Sync + 'static {
    async fn channels(&self, node_id: NodeId) -> anyhow::Result<Vec<ChannelState>>;
}

/// One workflow execution chain: the node it runs for and its log reference.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub node_id: NodeId,
    pub reference: String,
    pub trigger_group_node_id: i64,
    /// Cancelled as soon as this trigger firing completes.
    pub token: CancellationToken,
}

/// Workflow storage and node execution.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync + 'static {
    /// Trigger nodes of every active workflow version with the given kind.
    async fn active_trigger_nodes(&self, kind: WorkflowNodeKind) -> anyhow::Result<Vec<WorkflowNode>>;

    async fn workflow_node(&self, workflow_version_node_id: i64) -> anyhow::Result<WorkflowNode>;

    /// Group node that owns the children of a trigger node; `0` if none.
    async fn trigger_group_node_id(&self, workflow_version_node_id: i64) -> anyhow::Result<i64>;

    /// Stage trigger nodes of a workflow version, in execution order.
    async fn stage_trigger_nodes(&self, workflow_version_id: i64) -> anyhow::Result<Vec<WorkflowNode>>;

    /// Executes a node and everything linked below it; returns its outputs.
    async fn process_node(
        &self,
        run: &WorkflowRun,
        node: &WorkflowNode,
        inputs: &Parameters,
    ) -> anyhow::Result<Parameters>;

    /// Records one node execution in the workflow log.
    async fn log_execution(
        &self,
        run: &WorkflowRun,
        workflow_version_node_id: i64,
        inputs: &Parameters,
        outputs: &Parameters,
        error: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// In-process channel event hub.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    balance: broadcast::Sender<ChannelBalanceEvent>,
    channel: broadcast::Sender<ChannelEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (balance, _) = broadcast::channel(capacity);
        let (channel, _) = broadcast::channel(capacity);
        Self { balance, channel }
    }

    pub fn publish_balance(&self, ev: ChannelBalanceEvent) {
        let _ = self.balance.send(ev);
    }

    pub fn publish_channel(&self, ev: ChannelEvent) {
        let _ = self.channel.send(ev);
    }
}

impl ChannelEventSource for EventBroadcaster {
    fn subscribe_channel_balance(&self) -> broadcast::Receiver<ChannelBalanceEvent> {
        self.balance.subscribe()
    }

    fn subscribe_channel_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.channel.subscribe()
    }
}
