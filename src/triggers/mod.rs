//! Workflow trigger machinery.
//!
//! - [`registry`]: single-writer registry of trigger-driven executors
//! - [`workflow`]: workflow node model and execution parameters
//! - [`queue`]: pending trigger occurrences and activation times
//! - [`monitor`]: time and channel-event trigger monitors
//! - [`consumer`]: executes queued occurrences and their stage nodes
//! - [`automation`]: the automation service body running all of the above per node

pub mod automation;
pub mod consumer;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod workflow;

#[cfg(test)]
mod fakes;

pub use automation::AutomationService;
pub use consumer::ScheduledTriggerConsumer;
pub use monitor::{EventTriggerMonitor, TimeTriggerMonitor};
pub use queue::{trigger_reference, ScheduledTrigger, TriggerQueue};
pub use registry::{
    ExecutorStatus, OriginId, TriggerExecutor, TriggerKey, TriggerOrigin, TriggerRegistry, TriggerRequest,
};
pub use workflow::{
    ParameterLabel, Parameters, TimeTriggerParameters, TriggeringEvent, WorkflowNode, WorkflowNodeKind,
};
