//! Workflow node model shared by the trigger monitors, the consumer, and the
//! [`WorkflowExecutor`](crate::collaborators::WorkflowExecutor) collaborator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::balance::{ChannelBalanceEvent, ChannelEvent};

/// Kinds of workflow nodes the trigger machinery distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowNodeKind {
    TimeTrigger,
    ChannelBalanceEventTrigger,
    ChannelOpenEventTrigger,
    ChannelCloseEventTrigger,
    StageTrigger,
}

impl WorkflowNodeKind {
    /// True for kinds whose occurrences are driven by channel events.
    pub fn is_event_trigger(self) -> bool {
        matches!(
            self,
            WorkflowNodeKind::ChannelBalanceEventTrigger
                | WorkflowNodeKind::ChannelOpenEventTrigger
                | WorkflowNodeKind::ChannelCloseEventTrigger
        )
    }
}

impl fmt::Display for WorkflowNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One node of a workflow version graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub workflow_version_id: i64,
    pub workflow_version_node_id: i64,
    pub kind: WorkflowNodeKind,
    #[serde(default)]
    pub name: String,
    /// Node configuration as stored by the workflow editor.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Parameters of a time-trigger node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeTriggerParameters {
    /// Minimum interval between two firings.
    pub seconds: i64,
}

impl WorkflowNode {
    /// Parses the node parameters as time-trigger parameters.
    pub fn time_trigger_parameters(&self) -> Result<TimeTriggerParameters, serde_json::Error> {
        TimeTriggerParameters::deserialize(&self.parameters)
    }
}

/// Labels under which trigger inputs are handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterLabel {
    TimeTriggered,
    ChannelEventTriggered,
    Channels,
    RoutingPolicySettings,
    RebalanceSettings,
}

/// Input/output map of one workflow node execution (label → JSON string).
pub type Parameters = BTreeMap<ParameterLabel, String>;

/// Something that caused a trigger occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TriggeringEvent {
    /// A trigger node itself: a time tick or the bootstrap marker.
    Node(WorkflowNode),
    ChannelBalance(ChannelBalanceEvent),
    Channel(ChannelEvent),
}

impl TriggeringEvent {
    pub fn as_node(&self) -> Option<&WorkflowNode> {
        match self {
            TriggeringEvent::Node(n) => Some(n),
            _ => None,
        }
    }
}
