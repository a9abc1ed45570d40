//! Service vocabulary and state.
//!
//! - [`types`]: service types, statuses, sub-streams, node ids
//! - [`registry`]: the process-wide [`StatusRegistry`]
//! - [`command`]: [`ServiceCommand`] and the [`CommandSender`] handle
//! - [`delayed`]: deferred boot commands
//! - [`body`]: service body trait and run context

pub mod body;
pub mod command;
pub mod delayed;
pub mod registry;
pub mod types;

pub use body::{BoxServiceFuture, ServiceBody, ServiceBodyRef, ServiceContext, ServiceFn};
pub use command::{CommandKind, CommandSender, RawCommand, ServiceCommand};
pub use delayed::{DelayedCommand, DelayedQueue};
pub use registry::{BootGuard, ServiceSnapshot, StatusRegistry};
pub use types::{NodeId, ServiceStatus, ServiceType, SubscriptionStream, ALL_NODES, DUMMY_NODE_ID};
