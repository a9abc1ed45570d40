//! # Events published by the nodevisor runtime.
//!
//! The central payload is [`ServiceEvent`]: one observed status transition of a
//! service record (or of a node-link sub-stream). The status change detector builds
//! exactly one per transition and hands it to the router and to the [`Bus`](super::Bus).
//!
//! On the bus every payload travels inside an [`Event`], which adds a global sequence
//! number and a wall-clock timestamp. [`EventKind`] classifies it:
//! - **Status events**: [`EventKind::ServiceStatusChanged`] (carries a `ServiceEvent`)
//! - **Subscriber events**: overflow and panic reports from the fan-out workers
//! - **Runtime events**: shutdown progress and the fatal core-service path
//!
//! ## Ordering guarantees
//! `seq` is globally unique and increases monotonically. Use it to restore the exact
//! order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use nodevisor::{Event, EventKind, ServiceEvent, ServiceStatus, ServiceType};
//!
//! let change = ServiceEvent::new(
//!     ServiceType::NodeLinkService,
//!     7,
//!     ServiceStatus::Pending,
//!     ServiceStatus::Active,
//! );
//! let ev = Event::status_changed(change);
//!
//! assert_eq!(ev.kind, EventKind::ServiceStatusChanged);
//! assert_eq!(ev.service.as_ref().map(|s| s.node_id), Some(7));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::{NodeId, ServiceStatus, ServiceType, SubscriptionStream};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// One observed status transition.
///
/// Immutable once built. `stream` is set only for node-link sub-stream transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEvent {
    #[serde(serialize_with = "serialize_display")]
    pub service: ServiceType,
    #[serde(serialize_with = "serialize_opt_display")]
    pub stream: Option<SubscriptionStream>,
    pub node_id: NodeId,
    #[serde(serialize_with = "serialize_display")]
    pub previous: ServiceStatus,
    #[serde(serialize_with = "serialize_display")]
    pub status: ServiceStatus,
    pub event_time: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(
        service: ServiceType,
        node_id: NodeId,
        previous: ServiceStatus,
        status: ServiceStatus,
    ) -> Self {
        Self {
            service,
            stream: None,
            node_id,
            previous,
            status,
            event_time: Utc::now(),
        }
    }

    /// Attaches the sub-stream this transition belongs to.
    #[inline]
    pub fn with_stream(mut self, stream: SubscriptionStream) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Renders the event as a JSON object for external notifiers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    v: &T,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_str(v)
}

fn serialize_opt_display<T: std::fmt::Display, S: serde::Serializer>(
    v: &Option<T>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

/// Classification of bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Status events ===
    /// A service record or sub-stream changed status.
    ///
    /// Sets:
    /// - `service`: the transition
    ServiceStatusChanged,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Runtime events ===
    /// Shutdown requested (OS signal or explicit stop).
    ShutdownRequested,

    /// All boot tasks stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some boot tasks did not stop in time.
    ///
    /// Sets:
    /// - `reason`: stuck services
    GraceExceeded,

    /// The core service went inactive; the runtime is terminating.
    CoreServiceDied,
}

/// Bus envelope with ordering metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Status transition, for [`EventKind::ServiceStatusChanged`].
    pub service: Option<ServiceEvent>,
    /// Subscriber name, for subscriber events.
    pub subscriber: Option<Arc<str>>,
    /// Human-readable reason (overflow details, panic message, stuck services).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            subscriber: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_subscriber(mut self, subscriber: impl Into<Arc<str>>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    /// Wraps a status transition.
    pub fn status_changed(change: ServiceEvent) -> Self {
        let mut ev = Event::new(EventKind::ServiceStatusChanged);
        ev.service = Some(change);
        ev
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_subscriber(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_subscriber(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::ShutdownRequested);
        let b = Event::new(EventKind::ShutdownRequested);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_service_event_json_uses_names() {
        let ev = ServiceEvent::new(
            ServiceType::NodeLinkService,
            3,
            ServiceStatus::Initializing,
            ServiceStatus::Active,
        )
        .with_stream(SubscriptionStream::InvoiceStream);
        let json = ev.to_json();
        assert_eq!(json["service"], "NodeLinkService");
        assert_eq!(json["stream"], "InvoiceStream");
        assert_eq!(json["status"], "Active");
        assert_eq!(json["node_id"], 3);
    }
}
