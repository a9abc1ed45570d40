//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`ServiceEvent`] one observed status transition
//! - [`EventKind`], [`Event`] bus envelope with ordering metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `StatusDetector`, `Runtime` (shutdown, fatal path),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the runtime's subscriber listener (fans out to `SubscriberSet`)
//!   and any caller of [`Runtime::subscribe`](crate::Runtime::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, ServiceEvent};
