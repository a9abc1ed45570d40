//! Shared fakes and a runtime harness for the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nodevisor::collaborators::{ConnectionFactory, ConnectionRef, NodeConnection, NodeDescriptor, NodeDirectory, NodeFilter};
use nodevisor::{
    CommandSender, Config, Event, EventKind, NodeId, RuntimeBuilder, RuntimeError, ServiceBodyRef, ServiceContext,
    ServiceError, ServiceFn, ServiceStatus, ServiceType, StatusRegistry, TriggerRegistry,
};

/// Config with a fast tick so tests observe transitions quickly.
pub fn fast_config() -> Config {
    Config {
        tick: Duration::from_millis(10),
        retry_delay: Duration::from_secs(60),
        grace: Duration::from_secs(1),
        ..Config::default()
    }
}

/// In-memory node roster.
#[derive(Default)]
pub struct FakeDirectory {
    nodes: Mutex<Vec<NodeDescriptor>>,
}

impl FakeDirectory {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(nodes),
        })
    }
}

#[async_trait]
impl NodeDirectory for FakeDirectory {
    async fn active_nodes(&self, filter: NodeFilter) -> anyhow::Result<Vec<NodeDescriptor>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.iter().filter(|n| n.active && n.matches(filter)).cloned().collect())
    }

    async fn node(&self, node_id: NodeId) -> anyhow::Result<Option<NodeDescriptor>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.iter().find(|n| n.node_id == node_id).cloned())
    }

    async fn all_node_ids(&self) -> anyhow::Result<Vec<NodeId>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.iter().map(|n| n.node_id).collect())
    }
}

#[derive(Debug)]
pub struct FakeConnection(pub NodeId);

impl NodeConnection for FakeConnection {
    fn node_id(&self) -> NodeId {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connection factory with an optional latency and a failure switch.
#[derive(Default)]
pub struct FakeConnector {
    latency: Duration,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnector {
    async fn connect(&self, node: &NodeDescriptor) -> anyhow::Result<ConnectionRef> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("node {} unreachable", node.node_id);
        }
        Ok(Arc::new(FakeConnection(node.node_id)))
    }
}

/// Body that counts starts, reports `Active` and waits for cancellation.
pub fn counting_body(starts: Arc<AtomicUsize>) -> ServiceBodyRef {
    ServiceFn::arc("counting", move |ctx: ServiceContext| {
        let starts = Arc::clone(&starts);
        async move {
            starts.fetch_add(1, Ordering::SeqCst);
            ctx.active();
            ctx.cancelled().await;
            Ok::<_, ServiceError>(())
        }
    })
}

/// Running runtime plus the handles the tests drive it with.
pub struct Harness {
    pub registry: Arc<StatusRegistry>,
    pub commands: CommandSender,
    pub triggers: TriggerRegistry,
    pub events: broadcast::Receiver<Event>,
    pub token: CancellationToken,
    handle: JoinHandle<Result<(), RuntimeError>>,
}

impl Harness {
    pub fn start(builder: RuntimeBuilder) -> Self {
        let runtime = builder.build();
        let registry = Arc::clone(runtime.registry());
        let commands = runtime.commands();
        let triggers = runtime.triggers();
        let events = runtime.subscribe();
        let token = runtime.shutdown_token();
        let handle = tokio::spawn(runtime.run());
        Self {
            registry,
            commands,
            triggers,
            events,
            token,
            handle,
        }
    }

    pub fn status(&self, service: ServiceType, node: NodeId) -> ServiceStatus {
        self.registry.status(service, node)
    }

    /// Polls `cond` every millisecond until it holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, cond: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cond(self)
    }

    /// Status-change events seen so far for one record, in publish order.
    pub fn drain_transitions(&mut self, service: ServiceType, node: NodeId) -> Vec<ServiceStatus> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            if ev.kind != EventKind::ServiceStatusChanged {
                continue;
            }
            if let Some(ch) = ev.service {
                if ch.service == service && ch.node_id == node && ch.stream.is_none() {
                    out.push(ch.status);
                }
            }
        }
        out
    }

    /// Waits for the runtime to return on its own.
    pub async fn join(self) -> Result<(), RuntimeError> {
        self.handle.await.expect("runtime task panicked")
    }

    /// Cancels the root token and waits for the runtime to return.
    pub async fn stop(self) -> Result<(), RuntimeError> {
        self.token.cancel();
        self.join().await
    }
}
