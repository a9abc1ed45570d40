use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::workflow::{ParameterLabel, Parameters, WorkflowNode, WorkflowNodeKind};
use crate::balance::ChannelState;
use crate::collaborators::{ChannelStateSource, WorkflowExecutor, WorkflowRun};
use crate::services::NodeId;

pub(crate) fn node(wvid: i64, wvnid: i64, kind: WorkflowNodeKind, params: serde_json::Value) -> WorkflowNode {
    WorkflowNode {
        workflow_version_id: wvid,
        workflow_version_node_id: wvnid,
        kind,
        name: format!("node-{wvnid}"),
        parameters: params,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub workflow_version_node_id: i64,
    pub reference: String,
    pub inputs: Parameters,
    pub token_cancelled: bool,
}

#[derive(Default)]
pub(crate) struct RecordingExecutor {
    pub nodes: Vec<WorkflowNode>,
    pub stages: HashMap<i64, Vec<WorkflowNode>>,
    pub failing: Vec<i64>,
    pub calls: Mutex<Vec<Call>>,
    pub logs: Mutex<Vec<(i64, Option<String>)>>,
}

impl RecordingExecutor {
    pub fn with_nodes(nodes: Vec<WorkflowNode>) -> Arc<Self> {
        Arc::new(Self {
            nodes,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowExecutor for RecordingExecutor {
    async fn active_trigger_nodes(&self, kind: WorkflowNodeKind) -> anyhow::Result<Vec<WorkflowNode>> {
        Ok(self.nodes.iter().filter(|n| n.kind == kind).cloned().collect())
    }

    async fn workflow_node(&self, workflow_version_node_id: i64) -> anyhow::Result<WorkflowNode> {
        self.nodes
            .iter()
            .chain(self.stages.values().flatten())
            .find(|n| n.workflow_version_node_id == workflow_version_node_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown node {workflow_version_node_id}"))
    }

    async fn trigger_group_node_id(&self, workflow_version_node_id: i64) -> anyhow::Result<i64> {
        Ok(workflow_version_node_id + 1000)
    }

    async fn stage_trigger_nodes(&self, workflow_version_id: i64) -> anyhow::Result<Vec<WorkflowNode>> {
        Ok(self.stages.get(&workflow_version_id).cloned().unwrap_or_default())
    }

    async fn process_node(
        &self,
        run: &WorkflowRun,
        node: &WorkflowNode,
        inputs: &Parameters,
    ) -> anyhow::Result<Parameters> {
        self.calls.lock().unwrap().push(Call {
            workflow_version_node_id: node.workflow_version_node_id,
            reference: run.reference.clone(),
            inputs: inputs.clone(),
            token_cancelled: run.token.is_cancelled(),
        });
        if self.failing.contains(&node.workflow_version_node_id) {
            anyhow::bail!("node {} failed", node.workflow_version_node_id);
        }
        Ok(Parameters::from([(
            ParameterLabel::Channels,
            format!("out-{}", node.workflow_version_node_id),
        )]))
    }

    async fn log_execution(
        &self,
        _run: &WorkflowRun,
        workflow_version_node_id: i64,
        _inputs: &Parameters,
        _outputs: &Parameters,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.logs
            .lock()
            .unwrap()
            .push((workflow_version_node_id, error.map(str::to_string)));
        Ok(())
    }
}

pub(crate) struct StaticChannels(pub Vec<ChannelState>);

#[async_trait]
impl ChannelStateSource for StaticChannels {
    async fn channels(&self, _node_id: NodeId) -> anyhow::Result<Vec<ChannelState>> {
        Ok(self.0.clone())
    }
}
