//! # Event subscribers.
//!
//! ```text
//! Detector ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                   │
//!                                                     ┌─────────────┼─────────┐
//!                                                     ▼             ▼         ▼
//!                                                 LogWriter     Notifier   Custom
//! ```
//!
//! - [`Subscribe`] extension trait for external consumers
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] built-in tracing renderer

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
