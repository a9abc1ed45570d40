//! # Pending set of deferred boot commands.
//!
//! A [`DelayedCommand`] is a Boot command whose nodes were already resolved but whose
//! launch is deferred until `fire_at`. The queue is unordered; the scheduler loop
//! pops every due entry on each tick.
//!
//! Several delayed commands for the same service/node may coexist; all of them fire.
//! Duplicate launches are absorbed by the boot lock, not by the queue.

use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;

use super::command::ServiceCommand;
use crate::collaborators::NodeDescriptor;

/// Boot command waiting for its fire time.
#[derive(Debug, Clone)]
pub struct DelayedCommand {
    /// Service name, for logs.
    pub name: String,
    /// The command as originally received.
    pub command: ServiceCommand,
    /// Nodes resolved when the command was accepted.
    pub nodes: Vec<NodeDescriptor>,
    /// Earliest instant at which the command may fire.
    pub fire_at: Instant,
}

impl DelayedCommand {
    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        self.fire_at <= now
    }
}

/// Thread-safe pending set of delayed commands.
#[derive(Debug, Default)]
pub struct DelayedQueue {
    pending: Mutex<Vec<DelayedCommand>>,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, cmd: DelayedCommand) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cmd);
    }

    /// Removes and returns one due command, if any.
    pub fn pop_due(&self, now: Instant) -> Option<DelayedCommand> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = pending.iter().position(|c| c.is_due(now))?;
        Some(pending.swap_remove(idx))
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
