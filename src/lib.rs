//! # nodevisor
//!
//! **Nodevisor** supervises the long-running background services of a Lightning
//! node management daemon and schedules workflow triggers on top of them.
//!
//! Every service is identified by a [`ServiceType`] and, for node-scoped types, a
//! node id. Its lifecycle lives in one process-wide [`StatusRegistry`]; everything
//! else reacts to changes observed there.
//!
//! ## Architecture
//! ```text
//!   embedder / router                                   OS signal
//!          │ ServiceCommand                                 │
//!          ▼                                                ▼
//! ┌──────────────────┐  delayed   ┌──────────────────┐  ┌──────────────┐
//! │    Supervisor    │──────────► │ DelayedScheduler │  │   Runtime    │
//! │ resolve targets, │ ◄──────────│   (every tick)   │  │ root token,  │
//! │ boot lock, boot  │    due     └──────────────────┘  │ grace period │
//! └────────┬─────────┘                                  └──────────────┘
//!          │ ServiceBody::run(ctx)
//!          ▼
//! ┌──────────────────┐   diff    ┌──────────────────┐   ┌──────────────┐
//! │  StatusRegistry  │─────────► │  StatusDetector  │──►│ StatusRouter │── commands ──► Supervisor
//! │ status, streams, │           │   (every tick)   │   │ dependents,  │
//! │ cancel handles   │           └────────┬─────────┘   │ retry, fatal │
//! └──────────────────┘                    ▼             └──────────────┘
//!                                ┌──────────────────┐
//!                                │ Bus ─► Subscribe │
//!                                └──────────────────┘
//! ```
//!
//! ### Service lifecycle
//! ```text
//! Inactive ─► Pending ─► Initializing ─► Active ─┬─► Inactive              (cancelled / shutdown)
//!                                                ├─► BootRequested          (restart now)
//!                                                └─► BootRequestedWithDelay (restart after retry delay)
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                      |
//! |-------------------|-----------------------------------------------------------|-----------------------------------------|
//! | **Services**      | Bodies run per node or as singletons.                     | [`ServiceBody`], [`ServiceFn`]          |
//! | **Commands**      | Fire-and-forget boot/cancel requests.                     | [`ServiceCommand`], [`CommandSender`]   |
//! | **Subscribers**   | Observe status changes and runtime events.                | [`Subscribe`], [`LogWriter`]            |
//! | **Triggers**      | Executor registry, time and channel-event workflows.      | [`TriggerRegistry`], [`AutomationService`] |
//! | **Errors**        | Typed errors for the runtime, bodies and triggers.        | [`RuntimeError`], [`ServiceError`]      |
//! | **Configuration** | Tick, retry delay, grace, capacities.                     | [`Config`]                              |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use nodevisor::collaborators::{ConnectionFactory, NodeDirectory};
//! use nodevisor::{Config, LogWriter, RuntimeBuilder, ServiceContext, ServiceError, ServiceFn, ServiceType};
//!
//! async fn start(
//!     directory: Arc<dyn NodeDirectory>,
//!     connector: Arc<dyn ConnectionFactory>,
//! ) -> Result<(), nodevisor::RuntimeError> {
//!     nodevisor::init_tracing("info");
//!
//!     let node_link = ServiceFn::arc("node-link", |ctx: ServiceContext| async move {
//!         ctx.active();
//!         ctx.token().cancelled().await;
//!         Ok::<_, ServiceError>(())
//!     });
//!
//!     RuntimeBuilder::new(Config::from_env(), directory, connector)
//!         .with_service(ServiceType::NodeLinkService, node_link)
//!         .with_subscribers(vec![Arc::new(LogWriter::default())])
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

pub mod balance;
pub mod collaborators;
pub mod config;
mod core;
pub mod error;
pub mod events;
pub mod services;
pub mod subscribers;
pub mod triggers;

// ---- Public re-exports ----

pub use crate::core::{FatalHook, Runtime, RuntimeBuilder};
pub use config::Config;
pub use error::{CommandError, RuntimeError, ServiceError, TriggerError};
pub use events::{Bus, Event, EventKind, ServiceEvent};
pub use services::{
    BoxServiceFuture, CommandSender, NodeId, ServiceBody, ServiceBodyRef, ServiceCommand,
    ServiceContext, ServiceFn, ServiceSnapshot, ServiceStatus, ServiceType, StatusRegistry,
    SubscriptionStream, ALL_NODES, DUMMY_NODE_ID,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use triggers::{AutomationService, TriggerRegistry};

/// Installs a global `tracing` fmt subscriber filtered by `RUST_LOG`, falling back
/// to `default_directive` when the variable is unset or invalid.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
