//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging external consumers (UI push,
//! notifiers, metrics) into the ServiceEvent stream. Each subscriber is driven by a
//! dedicated worker loop fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries); they do **not** block
//!   the detector nor other subscribers.
//! - Each subscriber declares its queue capacity via [`Subscribe::queue_capacity`].
//!   If a queue overflows, events for that subscriber are **dropped**.
//!
//! ## Example
//! ```rust
//! use nodevisor::{Event, EventKind, Subscribe};
//!
//! struct Notifier;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Notifier {
//!     async fn on_event(&self, ev: &Event) {
//!         if let (EventKind::ServiceStatusChanged, Some(change)) = (ev.kind, &ev.service) {
//!             let _payload = change.to_json();
//!         }
//!     }
//!     fn name(&self) -> &'static str { "notifier" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
