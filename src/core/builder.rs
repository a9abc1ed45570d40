use std::collections::HashMap;
use std::sync::Arc;

use super::router::FatalHook;
use super::runtime::{Runtime, RuntimeParts};
use crate::{
    collaborators::{
        CacheWarmer, ChannelEventSource, ChannelStateSource, ConnectionFactory, NodeDirectory,
        WorkflowExecutor,
    },
    config::Config,
    events::Bus,
    services::{ServiceBodyRef, ServiceType},
    subscribers::{Subscribe, SubscriberSet},
    triggers::AutomationService,
};

/// Builder for a [`Runtime`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # async fn demo(
/// #     directory: Arc<dyn nodevisor::collaborators::NodeDirectory>,
/// #     connector: Arc<dyn nodevisor::collaborators::ConnectionFactory>,
/// #     rebalance: nodevisor::ServiceBodyRef,
/// # ) -> Result<(), nodevisor::RuntimeError> {
/// use nodevisor::{Config, LogWriter, RuntimeBuilder, ServiceType};
///
/// let runtime = RuntimeBuilder::new(Config::from_env(), directory, connector)
///     .with_service(ServiceType::RebalanceService, rebalance)
///     .with_subscribers(vec![Arc::new(LogWriter::default())])
///     .build();
/// runtime.run().await
/// # }
/// ```
pub struct RuntimeBuilder {
    cfg: Config,
    directory: Arc<dyn NodeDirectory>,
    connector: Arc<dyn ConnectionFactory>,
    bodies: HashMap<ServiceType, ServiceBodyRef>,
    warmers: Vec<Arc<dyn CacheWarmer>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    on_fatal: Option<FatalHook>,
    bootstrap_core: bool,
}

impl RuntimeBuilder {
    pub fn new(
        cfg: Config,
        directory: Arc<dyn NodeDirectory>,
        connector: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            cfg,
            directory,
            connector,
            bodies: HashMap::new(),
            warmers: Vec::new(),
            subscribers: Vec::new(),
            on_fatal: None,
            bootstrap_core: true,
        }
    }

    /// Registers the body run for every instance of `service`. Replaces any previous body.
    pub fn with_service(mut self, service: ServiceType, body: ServiceBodyRef) -> Self {
        self.bodies.insert(service, body);
        self
    }

    /// Registers the workflow automation singleton.
    pub fn with_automation(
        self,
        executor: Arc<dyn WorkflowExecutor>,
        source: Arc<dyn ChannelEventSource>,
        channels: Arc<dyn ChannelStateSource>,
    ) -> Self {
        let automation = AutomationService::new(
            &self.cfg,
            Arc::clone(&self.directory),
            executor,
            source,
            channels,
        );
        self.with_service(ServiceType::AutomationService, Arc::new(automation))
    }

    /// Adds a cache warmer run when the core service initializes.
    pub fn with_cache_warmer(mut self, warmer: Arc<dyn CacheWarmer>) -> Self {
        self.warmers.push(warmer);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Hook invoked once when the core service dies, before the runtime shuts down.
    pub fn on_fatal(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_fatal = Some(Arc::new(hook));
        self
    }

    /// Whether [`Runtime::run`] boots the core service itself (default `true`).
    ///
    /// When disabled the embedder drives the core status through the registry.
    pub fn bootstrap_core(mut self, enabled: bool) -> Self {
        self.bootstrap_core = enabled;
        self
    }

    /// Builds the runtime. Must be called within a Tokio runtime.
    pub fn build(self) -> Runtime {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        Runtime::from_parts(RuntimeParts {
            cfg: self.cfg,
            directory: self.directory,
            connector: self.connector,
            bodies: self.bodies,
            warmers: self.warmers,
            bus,
            subs,
            fatal_hook: self.on_fatal,
            bootstrap_core: self.bootstrap_core,
        })
    }
}
