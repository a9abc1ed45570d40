//! # Trigger monitors.
//!
//! Both monitors run per node inside the automation service and only schedule work;
//! execution belongs to the [`ScheduledTriggerConsumer`](super::ScheduledTriggerConsumer).
//!
//! ```text
//! TimeTriggerMonitor:  interval(workflow_tick) ─► time-trigger nodes due? ─► TriggerQueue
//!                      first tick only ─► every channel-balance trigger node (bootstrap marker)
//!
//! EventTriggerMonitor: ChannelEventSource ─┬─ balance event ─► channel-balance trigger nodes ─► TriggerQueue
//!                                          └─ open / closed ─► channel open/close trigger nodes ─► TriggerQueue
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{trigger_reference, TriggerQueue};
use super::workflow::{TriggeringEvent, WorkflowNodeKind};
use crate::balance::{ChannelBalanceEvent, ChannelEvent, ChannelEventKind};
use crate::collaborators::{ChannelEventSource, WorkflowExecutor};
use crate::services::NodeId;

/// Schedules time-trigger workflows whose interval elapsed.
pub struct TimeTriggerMonitor {
    node_id: NodeId,
    executor: Arc<dyn WorkflowExecutor>,
    queue: Arc<TriggerQueue>,
    bootstrapping: bool,
}

impl TimeTriggerMonitor {
    pub fn new(node_id: NodeId, executor: Arc<dyn WorkflowExecutor>, queue: Arc<TriggerQueue>) -> Self {
        Self {
            node_id,
            executor,
            queue,
            bootstrapping: true,
        }
    }

    /// One monitor pass. Returns the number of occurrences handed to the queue.
    ///
    /// The first successful pass also schedules every channel-balance trigger workflow
    /// once, skipping workflow versions already scheduled by a time trigger in the same pass.
    pub async fn tick(&mut self) -> usize {
        let nodes = match self.executor.active_trigger_nodes(WorkflowNodeKind::TimeTrigger).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(node_id = self.node_id, error = %e, "failed to obtain time trigger nodes");
                return 0;
            }
        };

        let mut scheduled = 0;
        let mut booted: Vec<i64> = Vec::new();
        for node in nodes {
            let params = match node.time_trigger_parameters() {
                Ok(p) => p,
                Err(e) => {
                    error!(
                        workflow_version_node_id = node.workflow_version_node_id,
                        error = %e,
                        "failed to parse time trigger parameters"
                    );
                    continue;
                }
            };
            if let Some(boot_time) = self.queue.boot_time(self.node_id, node.workflow_version_id) {
                if (Utc::now() - boot_time).num_seconds() < params.seconds {
                    continue;
                }
            }
            if self.bootstrapping {
                booted.push(node.workflow_version_id);
            }
            self.queue.schedule(
                self.node_id,
                trigger_reference(node.workflow_version_id, Utc::now()),
                node.workflow_version_id,
                node.kind,
                node.workflow_version_node_id,
                TriggeringEvent::Node(node.clone()),
            );
            scheduled += 1;
        }

        if self.bootstrapping {
            let nodes = match self
                .executor
                .active_trigger_nodes(WorkflowNodeKind::ChannelBalanceEventTrigger)
                .await
            {
                Ok(nodes) => nodes,
                Err(e) => {
                    error!(node_id = self.node_id, error = %e, "failed to obtain channel balance trigger nodes");
                    return scheduled;
                }
            };
            for node in nodes {
                if booted.contains(&node.workflow_version_id) {
                    continue;
                }
                debug!(node_id = self.node_id, workflow_version_id = node.workflow_version_id, "bootstrapping workflow");
                self.queue.schedule(
                    self.node_id,
                    trigger_reference(node.workflow_version_id, Utc::now()),
                    node.workflow_version_id,
                    node.kind,
                    node.workflow_version_node_id,
                    TriggeringEvent::Node(node.clone()),
                );
                scheduled += 1;
            }
            self.bootstrapping = false;
        }
        scheduled
    }

    pub async fn run(mut self, period: Duration, token: CancellationToken) {
        let mut ticker = time::interval_at(
            time::Instant::now() + period,
            period.max(Duration::from_millis(1)),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(node_id = self.node_id, "time trigger monitor terminated");
    }
}

/// Schedules event-trigger workflows for channel events of one node.
pub struct EventTriggerMonitor {
    node_id: NodeId,
    executor: Arc<dyn WorkflowExecutor>,
    queue: Arc<TriggerQueue>,
    source: Arc<dyn ChannelEventSource>,
}

impl EventTriggerMonitor {
    pub fn new(
        node_id: NodeId,
        executor: Arc<dyn WorkflowExecutor>,
        queue: Arc<TriggerQueue>,
        source: Arc<dyn ChannelEventSource>,
    ) -> Self {
        Self {
            node_id,
            executor,
            queue,
            source,
        }
    }

    /// Handles one balance event. Returns the number of occurrences scheduled.
    pub async fn on_balance_event(&self, ev: ChannelBalanceEvent) -> usize {
        if !self.is_own(ev.node_id, ev.channel_id) {
            return 0;
        }
        self.schedule_for(WorkflowNodeKind::ChannelBalanceEventTrigger, TriggeringEvent::ChannelBalance(ev))
            .await
    }

    /// Handles one channel lifecycle event. Only opens and closes trigger workflows.
    pub async fn on_channel_event(&self, ev: ChannelEvent) -> usize {
        if !self.is_own(ev.node_id, ev.channel_id) {
            return 0;
        }
        let kind = match ev.kind {
            ChannelEventKind::Open => WorkflowNodeKind::ChannelOpenEventTrigger,
            ChannelEventKind::Closed => WorkflowNodeKind::ChannelCloseEventTrigger,
            _ => return 0,
        };
        self.schedule_for(kind, TriggeringEvent::Channel(ev)).await
    }

    fn is_own(&self, node_id: NodeId, channel_id: i64) -> bool {
        node_id != 0 && channel_id != 0 && node_id == self.node_id
    }

    async fn schedule_for(&self, kind: WorkflowNodeKind, event: TriggeringEvent) -> usize {
        let nodes = match self.executor.active_trigger_nodes(kind).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(node_id = self.node_id, %kind, error = %e, "failed to obtain trigger nodes");
                return 0;
            }
        };
        let count = nodes.len();
        for node in nodes {
            self.queue.schedule(
                self.node_id,
                trigger_reference(node.workflow_version_id, Utc::now()),
                node.workflow_version_id,
                kind,
                node.workflow_version_node_id,
                event.clone(),
            );
        }
        count
    }

    pub async fn run(self, token: CancellationToken) {
        let mut balance = self.source.subscribe_channel_balance();
        let mut channel = self.source.subscribe_channel_events();
        let (mut balance_open, mut channel_open) = (true, true);

        while balance_open || channel_open {
            tokio::select! {
                _ = token.cancelled() => break,
                res = balance.recv(), if balance_open => match res {
                    Ok(ev) => {
                        self.on_balance_event(ev).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(node_id = self.node_id, skipped = n, "channel balance listener lagged");
                    }
                    Err(RecvError::Closed) => balance_open = false,
                },
                res = channel.recv(), if channel_open => match res {
                    Ok(ev) => {
                        self.on_channel_event(ev).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(node_id = self.node_id, skipped = n, "channel event listener lagged");
                    }
                    Err(RecvError::Closed) => channel_open = false,
                },
            }
        }
        info!(node_id = self.node_id, "event trigger monitor terminated");
    }
}
