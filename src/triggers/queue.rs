//! # Scheduled trigger queue and activation bookkeeping.
//!
//! Monitors [`schedule`](TriggerQueue::schedule) trigger occurrences; the consumer
//! [`pop`](TriggerQueue::pop)s them per node in FIFO order. Occurrences for the same
//! `(workflow version, trigger kind)` that are still waiting are coalesced: the new
//! triggering event is appended to the waiting entry instead of queueing a second run.
//!
//! Activations record when a workflow version last started executing on a node. The
//! time-trigger monitor reads that instant as the trigger's boot time; it outlives
//! the activation itself so intervals are measured from the last run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::workflow::{TriggeringEvent, WorkflowNodeKind};
use crate::services::NodeId;

/// Builds the execution reference of one trigger occurrence.
pub fn trigger_reference(workflow_version_id: i64, at: DateTime<Utc>) -> String {
    format!("{}_{}", workflow_version_id, at.format("%Y%m%d.%H%M%S.%6f"))
}

/// One pending trigger occurrence with the events accumulated for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTrigger {
    pub node_id: NodeId,
    pub reference: String,
    pub workflow_version_id: i64,
    pub kind: WorkflowNodeKind,
    /// Trigger node that caused the occurrence; `0` when unknown.
    pub trigger_node_id: i64,
    /// Triggering events, oldest first. Never empty.
    pub events: Vec<TriggeringEvent>,
}

impl ScheduledTrigger {
    pub fn first_event(&self) -> Option<&TriggeringEvent> {
        self.events.first()
    }

    pub fn last_event(&self) -> Option<&TriggeringEvent> {
        self.events.last()
    }
}

#[derive(Debug)]
struct Activation {
    reference: String,
    boot_time: DateTime<Utc>,
    token: Option<CancellationToken>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<NodeId, VecDeque<ScheduledTrigger>>,
    activations: HashMap<(NodeId, i64), Activation>,
}

/// Thread-safe pending set of trigger occurrences, per node.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    state: Mutex<QueueState>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an occurrence, or appends `event` to a waiting one for the same workflow and kind.
    ///
    /// Returns `true` when a new occurrence was queued.
    pub fn schedule(
        &self,
        node_id: NodeId,
        reference: String,
        workflow_version_id: i64,
        kind: WorkflowNodeKind,
        trigger_node_id: i64,
        event: TriggeringEvent,
    ) -> bool {
        let mut st = self.state();
        let queue = st.pending.entry(node_id).or_default();
        if let Some(waiting) = queue
            .iter_mut()
            .find(|t| t.workflow_version_id == workflow_version_id && t.kind == kind)
        {
            waiting.events.push(event);
            return false;
        }
        queue.push_back(ScheduledTrigger {
            node_id,
            reference,
            workflow_version_id,
            kind,
            trigger_node_id,
            events: vec![event],
        });
        true
    }

    /// Takes the oldest occurrence for `node_id`.
    pub fn pop(&self, node_id: NodeId) -> Option<ScheduledTrigger> {
        let mut st = self.state();
        let queue = st.pending.get_mut(&node_id)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            st.pending.remove(&node_id);
        }
        next
    }

    pub fn len(&self, node_id: NodeId) -> usize {
        self.state().pending.get(&node_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, node_id: NodeId) -> bool {
        self.len(node_id) == 0
    }

    /// Records the start of an execution; `token` is cancelled by [`cancel_node`](Self::cancel_node).
    pub fn activate(&self, node_id: NodeId, reference: &str, workflow_version_id: i64, token: CancellationToken) {
        self.state().activations.insert(
            (node_id, workflow_version_id),
            Activation {
                reference: reference.to_string(),
                boot_time: Utc::now(),
                token: Some(token),
            },
        );
    }

    /// Marks an execution finished. The boot time is kept.
    pub fn deactivate(&self, node_id: NodeId, workflow_version_id: i64) {
        if let Some(a) = self.state().activations.get_mut(&(node_id, workflow_version_id)) {
            a.token = None;
        }
    }

    /// When the workflow version last started executing on `node_id`.
    pub fn boot_time(&self, node_id: NodeId, workflow_version_id: i64) -> Option<DateTime<Utc>> {
        self.state()
            .activations
            .get(&(node_id, workflow_version_id))
            .map(|a| a.boot_time)
    }

    /// Reference of the execution currently running for the workflow version, if any.
    pub fn active_reference(&self, node_id: NodeId, workflow_version_id: i64) -> Option<String> {
        self.state()
            .activations
            .get(&(node_id, workflow_version_id))
            .filter(|a| a.token.is_some())
            .map(|a| a.reference.clone())
    }

    /// Cancels every running execution of a node and drops its pending occurrences.
    pub fn cancel_node(&self, node_id: NodeId) {
        let mut st = self.state();
        st.pending.remove(&node_id);
        for ((node, _), a) in st.activations.iter_mut() {
            if *node == node_id {
                if let Some(token) = a.token.take() {
                    token.cancel();
                }
            }
        }
    }
}
