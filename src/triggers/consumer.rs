//! # Scheduled trigger consumer.
//!
//! Drains one node's [`TriggerQueue`] and executes each occurrence:
//!
//! ```text
//! pop() ─► trigger node + group node ─┬─ bootstrap marker on an event trigger
//! (idle: sleep trigger_poll)          │     └─► one execution per synthetic channel-balance event
//!                                     └─ otherwise
//!                                           └─► one execution with all queued events as input
//!
//! execution: child token ─► activate ─► process_node ─► log ─► stage nodes (outputs → inputs) ─► cancel ─► deactivate
//! ```
//!
//! Failures of a single occurrence are logged and never stop the loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{ScheduledTrigger, TriggerQueue};
use super::workflow::{ParameterLabel, Parameters, TriggeringEvent, WorkflowNode, WorkflowNodeKind};
use crate::balance::{per_mille_ratio, ChannelBalanceEvent};
use crate::collaborators::{ChannelStateSource, WorkflowExecutor, WorkflowRun};
use crate::error::TriggerError;
use crate::services::NodeId;

pub struct ScheduledTriggerConsumer {
    node_id: NodeId,
    executor: Arc<dyn WorkflowExecutor>,
    queue: Arc<TriggerQueue>,
    channels: Arc<dyn ChannelStateSource>,
}

impl ScheduledTriggerConsumer {
    pub fn new(
        node_id: NodeId,
        executor: Arc<dyn WorkflowExecutor>,
        queue: Arc<TriggerQueue>,
        channels: Arc<dyn ChannelStateSource>,
    ) -> Self {
        Self {
            node_id,
            executor,
            queue,
            channels,
        }
    }

    /// Processes the oldest pending occurrence. Returns `false` if none was waiting.
    pub async fn process_next(&self, token: &CancellationToken) -> bool {
        let Some(trigger) = self.queue.pop(self.node_id) else {
            return false;
        };
        if let Err(e) = self.process(trigger, token).await {
            error!(node_id = self.node_id, error = %e, label = e.as_label(), "scheduled trigger dropped");
        }
        true
    }

    pub async fn run(self, poll: Duration, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            if self.process_next(&token).await {
                continue;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        info!(node_id = self.node_id, "scheduled trigger consumer terminated");
    }

    async fn process(&self, trigger: ScheduledTrigger, token: &CancellationToken) -> Result<(), TriggerError> {
        let Some(first) = trigger.first_event() else {
            return Ok(());
        };
        let marker = first.as_node().map(|n| n.workflow_version_node_id);
        let trigger_node_id = match trigger.kind {
            WorkflowNodeKind::TimeTrigger => marker.unwrap_or(trigger.trigger_node_id),
            _ if trigger.trigger_node_id != 0 => trigger.trigger_node_id,
            _ => marker.unwrap_or_default(),
        };

        let node = self
            .executor
            .workflow_node(trigger_node_id)
            .await
            .map_err(|e| node_error(trigger_node_id, e))?;
        let group = match self.executor.trigger_group_node_id(trigger_node_id).await {
            Ok(0) => return Err(node_error(trigger_node_id, "no trigger group node")),
            Ok(id) => id,
            Err(e) => return Err(node_error(trigger_node_id, e)),
        };

        if trigger.kind.is_event_trigger() && marker.is_some() {
            return self.bootstrap(&trigger, &node, group, token).await;
        }

        let events = serde_json::to_string(&trigger.events).map_err(|e| TriggerError::Execution(e.to_string()))?;
        let label = if node.kind == WorkflowNodeKind::TimeTrigger {
            ParameterLabel::TimeTriggered
        } else {
            ParameterLabel::ChannelEventTriggered
        };
        let inputs = Parameters::from([(label, events)]);
        self.execute_once(&trigger, &node, group, inputs, token).await;
        Ok(())
    }

    /// Replays one synthetic balance event per channel, since events missed while the
    /// process was down cannot be recovered.
    async fn bootstrap(
        &self,
        trigger: &ScheduledTrigger,
        node: &WorkflowNode,
        group: i64,
        token: &CancellationToken,
    ) -> Result<(), TriggerError> {
        let states = self
            .channels
            .channels(self.node_id)
            .await
            .map_err(|e| TriggerError::Execution(e.to_string()))?;
        let now = Utc::now();

        let mut by_remote: BTreeMap<NodeId, Vec<ChannelBalanceEvent>> = BTreeMap::new();
        for state in &states {
            by_remote
                .entry(state.remote_node_id)
                .or_default()
                .push(ChannelBalanceEvent::from_state(self.node_id, state, now));
        }

        for events in by_remote.values_mut() {
            let capacity: i64 = events.iter().map(|e| e.capacity).sum();
            if capacity == 0 {
                continue;
            }
            let local: i64 = events.iter().map(|e| e.local_balance).sum();
            let ratio = per_mille_ratio(local, capacity);
            for ev in events.iter_mut() {
                ev.aggregated_local_balance = local;
                ev.aggregated_local_balance_per_mille_ratio = ratio;
            }
        }

        debug!(node_id = self.node_id, channels = states.len(), reference = %trigger.reference, "bootstrapping channel balance workflow");
        for ev in by_remote.into_values().flatten() {
            let payload = match serde_json::to_string(&TriggeringEvent::ChannelBalance(ev)) {
                Ok(p) => p,
                Err(e) => {
                    error!(workflow_version_node_id = node.workflow_version_node_id, error = %e, "failed to encode channel balance event");
                    continue;
                }
            };
            let inputs = Parameters::from([(ParameterLabel::ChannelEventTriggered, payload)]);
            self.execute_once(trigger, node, group, inputs, token).await;
        }
        Ok(())
    }

    async fn execute_once(
        &self,
        trigger: &ScheduledTrigger,
        node: &WorkflowNode,
        group: i64,
        inputs: Parameters,
        token: &CancellationToken,
    ) {
        let child = token.child_token();
        self.queue
            .activate(self.node_id, &trigger.reference, node.workflow_version_id, child.clone());
        let run = WorkflowRun {
            node_id: self.node_id,
            reference: trigger.reference.clone(),
            trigger_group_node_id: group,
            token: child.clone(),
        };

        self.execute(&run, node, inputs).await;

        child.cancel();
        self.queue.deactivate(self.node_id, node.workflow_version_id);
    }

    /// Runs the trigger node, then its stage nodes with each output feeding the next input.
    async fn execute(&self, run: &WorkflowRun, node: &WorkflowNode, inputs: Parameters) {
        let mut outputs = match self.executor.process_node(run, node, &inputs).await {
            Ok(outputs) => {
                self.log(run, node.workflow_version_node_id, &inputs, &outputs, None).await;
                outputs
            }
            Err(e) => {
                let msg = e.to_string();
                self.log(run, node.workflow_version_node_id, &inputs, &Parameters::new(), Some(&msg))
                    .await;
                error!(
                    workflow_version_node_id = node.workflow_version_node_id,
                    reference = %run.reference,
                    error = %msg,
                    "failed to trigger root node"
                );
                return;
            }
        };

        let stages = match self.executor.stage_trigger_nodes(node.workflow_version_id).await {
            Ok(stages) => stages,
            Err(e) => {
                error!(workflow_version_id = node.workflow_version_id, error = %e, "failed to obtain stage trigger nodes");
                return;
            }
        };

        for stage in stages {
            let inputs = std::mem::take(&mut outputs);
            match self.executor.process_node(run, &stage, &inputs).await {
                Ok(out) => {
                    self.log(run, stage.workflow_version_node_id, &inputs, &out, None).await;
                    outputs = out;
                }
                Err(e) => {
                    let msg = e.to_string();
                    self.log(run, stage.workflow_version_node_id, &inputs, &Parameters::new(), Some(&msg))
                        .await;
                    error!(
                        workflow_version_node_id = stage.workflow_version_node_id,
                        reference = %run.reference,
                        error = %msg,
                        "failed to trigger stage node"
                    );
                    outputs = inputs;
                }
            }
        }
    }

    async fn log(
        &self,
        run: &WorkflowRun,
        workflow_version_node_id: i64,
        inputs: &Parameters,
        outputs: &Parameters,
        err: Option<&str>,
    ) {
        if let Err(e) = self
            .executor
            .log_execution(run, workflow_version_node_id, inputs, outputs, err)
            .await
        {
            warn!(workflow_version_node_id, reference = %run.reference, error = %e, "failed to record workflow log");
        }
    }
}

fn node_error(workflow_version_node_id: i64, e: impl std::fmt::Display) -> TriggerError {
    TriggerError::WorkflowNode {
        workflow_version_node_id,
        error: e.to_string(),
    }
}
