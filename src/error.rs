//! Error types used by the nodevisor runtime, service bodies, and trigger machinery.
//!
//! - [`RuntimeError`]: failures of the process root itself.
//! - [`ServiceError`]: failures reported by service bodies and boot connections.
//! - [`CommandError`]: rejected service commands.
//! - [`TriggerError`]: trigger registry and workflow execution failures.
//!
//! Each type provides `as_label` for stable log/metric labels.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the runtime root.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The core service went inactive; the process cannot continue.
    #[error("core service is inactive and cannot be restarted")]
    CoreServiceDied,

    /// Shutdown grace period was exceeded; some boot tasks remained running.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Services (`type/node`) that did not stop in time.
        stuck: Vec<String>,
    },

    /// OS signal listeners could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use nodevisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::CoreServiceDied.as_label(), "runtime_core_service_died");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::CoreServiceDied => "runtime_core_service_died",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Errors produced while booting or running a service body.
///
/// Every variant is recovered locally by the supervisor (restart path); none of them
/// crosses the command channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The external connection required by the service could not be established.
    #[error("connection failed: {error}")]
    Connection {
        /// The underlying error message.
        error: String,
    },

    /// The body failed while running.
    #[error("service failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The body observed cancellation and stopped.
    #[error("context cancelled")]
    Canceled,
}

impl ServiceError {
    /// Builds a [`ServiceError::Fail`] from anything printable.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        ServiceError::Fail {
            error: error.to_string(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Connection { .. } => "service_connection",
            ServiceError::Fail { .. } => "service_failed",
            ServiceError::Canceled => "service_canceled",
        }
    }

    /// Returns `false` only for cancellation; every failure is eligible for restart.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::Canceled)
    }
}

/// # Errors produced when submitting service commands.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// The service type string did not name a known service.
    #[error("unknown service type: {0:?}")]
    UnknownServiceType(String),

    /// The supervisor is no longer receiving commands.
    #[error("command channel closed")]
    Closed,
}

impl CommandError {
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::UnknownServiceType(_) => "command_unknown_service_type",
            CommandError::Closed => "command_channel_closed",
        }
    }
}

/// # Errors produced by the trigger scheduler and workflow execution.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TriggerError {
    /// The trigger registry actor has stopped.
    #[error("trigger registry is closed")]
    RegistryClosed,

    /// Neither an incoming nor an outgoing channel id was supplied.
    #[error("incoming and outgoing channel id cannot both be 0")]
    InvalidKey,

    /// A workflow node could not be loaded.
    #[error("workflow node {workflow_version_node_id}: {error}")]
    WorkflowNode {
        workflow_version_node_id: i64,
        error: String,
    },

    /// Workflow execution failed.
    #[error("workflow execution failed: {0}")]
    Execution(String),
}

impl TriggerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TriggerError::RegistryClosed => "trigger_registry_closed",
            TriggerError::InvalidKey => "trigger_invalid_key",
            TriggerError::WorkflowNode { .. } => "trigger_workflow_node",
            TriggerError::Execution(_) => "trigger_execution",
        }
    }
}
