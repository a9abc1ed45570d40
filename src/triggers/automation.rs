//! # Automation service body.
//!
//! Singleton [`ServiceBody`] that runs the trigger machinery for every active node:
//! a [`TimeTriggerMonitor`], an [`EventTriggerMonitor`], and a
//! [`ScheduledTriggerConsumer`] per node, all cancelled with the service.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use super::consumer::ScheduledTriggerConsumer;
use super::monitor::{EventTriggerMonitor, TimeTriggerMonitor};
use super::queue::TriggerQueue;
use crate::collaborators::{ChannelEventSource, ChannelStateSource, NodeDirectory, NodeFilter, WorkflowExecutor};
use crate::config::Config;
use crate::error::ServiceError;
use crate::services::{BoxServiceFuture, ServiceBody, ServiceContext};

/// Runs workflow triggers for all active nodes.
#[derive(Clone)]
pub struct AutomationService {
    directory: Arc<dyn NodeDirectory>,
    executor: Arc<dyn WorkflowExecutor>,
    source: Arc<dyn ChannelEventSource>,
    channels: Arc<dyn ChannelStateSource>,
    queue: Arc<TriggerQueue>,
    workflow_tick: Duration,
    trigger_poll: Duration,
}

impl AutomationService {
    pub fn new(
        cfg: &Config,
        directory: Arc<dyn NodeDirectory>,
        executor: Arc<dyn WorkflowExecutor>,
        source: Arc<dyn ChannelEventSource>,
        channels: Arc<dyn ChannelStateSource>,
    ) -> Self {
        Self {
            directory,
            executor,
            source,
            channels,
            queue: Arc::new(TriggerQueue::new()),
            workflow_tick: cfg.workflow_tick,
            trigger_poll: cfg.trigger_poll,
        }
    }

    /// Queue shared by the monitors and consumers of every node.
    pub fn queue(&self) -> &Arc<TriggerQueue> {
        &self.queue
    }

    async fn serve(self, ctx: ServiceContext) -> Result<(), ServiceError> {
        ctx.initializing();
        let nodes = self
            .directory
            .active_nodes(NodeFilter::All)
            .await
            .map_err(ServiceError::fail)?;

        let mut set = JoinSet::new();
        for node in &nodes {
            let node_id = node.node_id;
            let time = TimeTriggerMonitor::new(node_id, Arc::clone(&self.executor), Arc::clone(&self.queue));
            set.spawn(time.run(self.workflow_tick, ctx.token().child_token()));

            let events = EventTriggerMonitor::new(
                node_id,
                Arc::clone(&self.executor),
                Arc::clone(&self.queue),
                Arc::clone(&self.source),
            );
            set.spawn(events.run(ctx.token().child_token()));

            let consumer = ScheduledTriggerConsumer::new(
                node_id,
                Arc::clone(&self.executor),
                Arc::clone(&self.queue),
                Arc::clone(&self.channels),
            );
            set.spawn(consumer.run(self.trigger_poll, ctx.token().child_token()));
        }
        info!(nodes = nodes.len(), "automation monitors started");
        ctx.active();

        ctx.cancelled().await;
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "automation monitor aborted");
            }
        }
        for node in &nodes {
            self.queue.cancel_node(node.node_id);
        }
        Ok(())
    }
}

impl ServiceBody for AutomationService {
    fn name(&self) -> &str {
        "automation"
    }

    fn run(&self, ctx: ServiceContext) -> BoxServiceFuture {
        Box::pin(self.clone().serve(ctx))
    }
}
