//! # Status change detector.
//!
//! A tick-driven diff loop over the [`StatusRegistry`]. It remembers the last status
//! and write sequence it observed for every singleton record and every node-scoped
//! record, plus the last status of every `(sub-stream, node)` pair, and emits one
//! [`ServiceEvent`] per observed change.
//!
//! ```text
//! interval(tick) ──► poll()
//!                     ├─ singletons      (type, DUMMY_NODE_ID)
//!                     ├─ node-scoped     (type, node) for node ∈ directory ∪ registry ∪ seen
//!                     └─ sub-streams     (stream, node) for node-link nodes
//!                           │
//!                           └─ changed? ──► router queue + Bus (ServiceStatusChanged)
//! ```
//!
//! A record is compared by write sequence, not by value: a full lifecycle cycle that
//! lands on the same status inside one tick (a body that fails instantly and is
//! marked `BootRequestedWithDelay` again) still produces one event, with
//! `previous == status`. Intermediate states of that cycle are not reported.
//! Records never written report `(Inactive, 0)`, which is also the initial "seen"
//! value, so untouched records produce nothing. Sub-streams carry no sequence and
//! are compared by value.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborators::NodeDirectory;
use crate::events::{Bus, Event, ServiceEvent};
use crate::services::{
    NodeId, ServiceStatus, ServiceType, StatusRegistry, SubscriptionStream, DUMMY_NODE_ID,
};

pub(crate) struct StatusDetector {
    registry: Arc<StatusRegistry>,
    directory: Arc<dyn NodeDirectory>,
    bus: Bus,
    router: mpsc::UnboundedSender<ServiceEvent>,
    seen: HashMap<(ServiceType, NodeId), (ServiceStatus, u64)>,
    seen_streams: HashMap<(SubscriptionStream, NodeId), ServiceStatus>,
}

impl StatusDetector {
    pub(crate) fn new(
        registry: Arc<StatusRegistry>,
        directory: Arc<dyn NodeDirectory>,
        bus: Bus,
        router: mpsc::UnboundedSender<ServiceEvent>,
    ) -> Self {
        Self {
            registry,
            directory,
            bus,
            router,
            seen: HashMap::new(),
            seen_streams: HashMap::new(),
        }
    }

    /// Runs one diff pass. Returns the number of events emitted.
    pub(crate) async fn poll(&mut self) -> usize {
        let roster = match self.directory.all_node_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "node roster unavailable; diffing known records only");
                Vec::new()
            }
        };

        let mut emitted = 0;
        for service in ServiceType::SINGLETONS {
            emitted += usize::from(self.diff_record(service, DUMMY_NODE_ID));
        }

        for service in ServiceType::NODE_SCOPED {
            for node in self.nodes_of(service, &roster) {
                emitted += usize::from(self.diff_record(service, node));
            }
        }

        for node in self.stream_nodes(&roster) {
            for stream in SubscriptionStream::ALL {
                emitted += usize::from(self.diff_stream(stream, node));
            }
        }
        emitted
    }

    pub(crate) async fn run(mut self, tick: Duration, token: CancellationToken) {
        let mut ticker = time::interval(tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }
    }

    /// Roster nodes, plus nodes that only exist in this service's own records.
    fn nodes_of(&self, service: ServiceType, roster: &[NodeId]) -> BTreeSet<NodeId> {
        let mut nodes: BTreeSet<NodeId> = roster.iter().copied().collect();
        nodes.extend(self.registry.node_ids(service));
        nodes.extend(
            self.seen
                .keys()
                .filter(|(t, _)| *t == service)
                .map(|(_, n)| *n),
        );
        nodes
    }

    fn stream_nodes(&self, roster: &[NodeId]) -> BTreeSet<NodeId> {
        let mut nodes = self.nodes_of(ServiceType::NodeLinkService, roster);
        nodes.extend(self.seen_streams.keys().map(|(_, n)| *n));
        nodes
    }

    fn diff_record(&mut self, service: ServiceType, node: NodeId) -> bool {
        let (current, seq) = self.registry.status_with_seq(service, node);
        let (previous, seen_seq) = self.seen.get(&(service, node)).copied().unwrap_or_default();
        if seq == seen_seq {
            return false;
        }
        self.seen.insert((service, node), (current, seq));
        self.emit(ServiceEvent::new(service, node, previous, current));
        true
    }

    fn diff_stream(&mut self, stream: SubscriptionStream, node: NodeId) -> bool {
        let current = self.registry.stream_status(node, stream);
        let previous = self
            .seen_streams
            .get(&(stream, node))
            .copied()
            .unwrap_or_default();
        if current == previous {
            return false;
        }
        self.seen_streams.insert((stream, node), current);
        self.emit(
            ServiceEvent::new(ServiceType::NodeLinkService, node, previous, current).with_stream(stream),
        );
        true
    }

    fn emit(&self, change: ServiceEvent) {
        debug!(
            service = %change.service,
            node_id = change.node_id,
            stream = ?change.stream,
            from = %change.previous,
            to = %change.status,
            "status changed"
        );
        if self.router.send(change.clone()).is_err() {
            debug!("status router gone; event only published on the bus");
        }
        self.bus.publish(Event::status_changed(change));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NodeDescriptor, NodeFilter};
    use async_trait::async_trait;

    struct Roster(Vec<NodeId>);

    #[async_trait]
    impl NodeDirectory for Roster {
        async fn active_nodes(&self, _filter: NodeFilter) -> anyhow::Result<Vec<NodeDescriptor>> {
            Ok(Vec::new())
        }
        async fn node(&self, _node_id: NodeId) -> anyhow::Result<Option<NodeDescriptor>> {
            Ok(None)
        }
        async fn all_node_ids(&self) -> anyhow::Result<Vec<NodeId>> {
            Ok(self.0.clone())
        }
    }

    fn detector(roster: Vec<NodeId>) -> (StatusDetector, Arc<StatusRegistry>, mpsc::UnboundedReceiver<ServiceEvent>) {
        let registry = StatusRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let det = StatusDetector::new(Arc::clone(&registry), Arc::new(Roster(roster)), Bus::new(64), tx);
        (det, registry, rx)
    }

    #[tokio::test]
    async fn test_each_transition_reported_once() {
        let (mut det, registry, mut rx) = detector(vec![7]);

        registry.set_status(ServiceType::NodeLinkService, 7, ServiceStatus::Pending);
        assert_eq!(det.poll().await, 1);
        assert_eq!(det.poll().await, 0);

        registry.set_status(ServiceType::NodeLinkService, 7, ServiceStatus::Active);
        assert_eq!(det.poll().await, 1);

        let first = rx.recv().await.unwrap();
        assert_eq!((first.previous, first.status), (ServiceStatus::Inactive, ServiceStatus::Pending));
        let second = rx.recv().await.unwrap();
        assert_eq!((second.previous, second.status), (ServiceStatus::Pending, ServiceStatus::Active));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_records_outside_roster_are_diffed() {
        let (mut det, registry, mut rx) = detector(Vec::new());
        registry.set_status(ServiceType::RebalanceService, 42, ServiceStatus::Pending);
        assert_eq!(det.poll().await, 1);
        let ev = rx.recv().await.unwrap();
        assert_eq!((ev.service, ev.node_id), (ServiceType::RebalanceService, 42));
    }

    #[tokio::test]
    async fn test_stream_changes_carry_stream() {
        let (mut det, registry, mut rx) = detector(vec![3]);
        registry.set_stream_status(3, SubscriptionStream::PaymentStream, ServiceStatus::Active);
        assert_eq!(det.poll().await, 1);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.stream, Some(SubscriptionStream::PaymentStream));
        assert_eq!(ev.service, ServiceType::NodeLinkService);
    }

    #[tokio::test]
    async fn test_repeated_write_of_same_status_is_silent() {
        let (mut det, registry, _rx) = detector(vec![1]);
        registry.set_status(ServiceType::PingServiceA, 1, ServiceStatus::Inactive);
        assert_eq!(det.poll().await, 0);

        registry.set_status(ServiceType::PingServiceA, 1, ServiceStatus::Pending);
        assert_eq!(det.poll().await, 1);
        registry.set_status(ServiceType::PingServiceA, 1, ServiceStatus::Pending);
        assert_eq!(det.poll().await, 0);
    }

    #[tokio::test]
    async fn test_restart_cycle_within_tick_is_reported() {
        let (mut det, registry, mut rx) = detector(Vec::new());
        let cycle = [
            ServiceStatus::Pending,
            ServiceStatus::Active,
            ServiceStatus::BootRequestedWithDelay,
        ];

        for status in cycle {
            registry.set_status(ServiceType::MaintenanceService, DUMMY_NODE_ID, status);
        }
        assert_eq!(det.poll().await, 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, ServiceStatus::BootRequestedWithDelay);

        // The whole cycle runs again between two polls.
        for status in cycle {
            assert!(registry.set_status(ServiceType::MaintenanceService, DUMMY_NODE_ID, status));
        }
        assert_eq!(det.poll().await, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(
            (second.previous, second.status),
            (ServiceStatus::BootRequestedWithDelay, ServiceStatus::BootRequestedWithDelay)
        );
        assert_eq!(det.poll().await, 0);
    }
}
