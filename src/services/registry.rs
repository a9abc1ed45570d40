//! # Status registry: process-wide table of service records.
//!
//! Maps `(ServiceType, NodeId)` to a [`ServiceRecord`] holding the lifecycle status,
//! boot lock, cancel token, retry flags, and sub-stream statuses of one service
//! instance.
//!
//! ## Architecture
//! ```text
//! Supervisor ── set_status / register_cancel / cancel ──► StatusRegistry
//!                                                             │
//!                        RwLock<HashMap<(type, node), Arc<ServiceRecord>>>
//!                                                             │
//!                                   ┌─────────────────────────┴───────┐
//!                                   ▼                                 ▼
//!                             BootLock (flag)                 Mutex<RecordState>
//!                                                             (status, seq, cancel, ...)
//! Detector ── status / stream_status ───────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - The map lock is held only to find or create a record, never across I/O or boot bodies.
//! - Each record has its own short-lived mutex; operations on different nodes never contend.
//! - Boot locks are **try-only**: [`StatusRegistry::try_acquire_boot_lock`] never waits.
//! - Every accepted status change bumps a registry-wide sequence number, so the order
//!   of writes across records can be reconstructed.
//! - Records are created lazily on first write; reads of unknown records return `Inactive`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{NodeId, ServiceStatus, ServiceType, SubscriptionStream};

/// Mutual exclusion for boot attempts of one service record.
///
/// The `held` flag is the lock itself, so its state can be read without
/// touching the guard.
#[derive(Debug, Default)]
pub struct BootLock {
    held: AtomicBool,
}

impl BootLock {
    fn try_acquire(self: &Arc<Self>) -> Option<BootGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BootGuard {
                lock: Arc::clone(self),
            })
    }

    /// True while a boot attempt owns the lock.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of a held boot lock. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "dropping the guard releases the boot lock immediately"]
pub struct BootGuard {
    lock: Arc<BootLock>,
}

impl BootGuard {
    /// Releases the lock explicitly.
    pub fn release(self) {}
}

impl Drop for BootGuard {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct RecordState {
    status: ServiceStatus,
    seq: u64,
    boot_time: Option<DateTime<Utc>>,
    cancel: Option<CancellationToken>,
    no_delay: bool,
    enforced_status: Option<ServiceStatus>,
    streams: HashMap<SubscriptionStream, ServiceStatus>,
}

/// Bookkeeping for one `(service type, node)` pair.
#[derive(Debug, Default)]
pub struct ServiceRecord {
    boot_lock: Arc<BootLock>,
    state: Mutex<RecordState>,
}

impl ServiceRecord {
    fn state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only view of one record, as returned by [`StatusRegistry::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub service: ServiceType,
    pub node_id: NodeId,
    pub status: ServiceStatus,
    pub boot_time: Option<DateTime<Utc>>,
    pub booting: bool,
}

/// Process-wide service status table.
///
/// Constructed once by the runtime root and shared by `Arc` with every component
/// that reads or writes service state.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    records: RwLock<HashMap<(ServiceType, NodeId), Arc<ServiceRecord>>>,
    seq: AtomicU64,
}

impl StatusRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn find(&self, service: ServiceType, node: NodeId) -> Option<Arc<ServiceRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(service, node))
            .cloned()
    }

    fn record(&self, service: ServiceType, node: NodeId) -> Arc<ServiceRecord> {
        if let Some(rec) = self.find(service, node) {
            return rec;
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(records.entry((service, node)).or_default())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the current status, `Inactive` if the record is unknown.
    pub fn status(&self, service: ServiceType, node: NodeId) -> ServiceStatus {
        self.find(service, node)
            .map(|r| r.state().status)
            .unwrap_or_default()
    }

    /// Returns the current status with the sequence number of the write that set it.
    ///
    /// Unknown records report `(Inactive, 0)`.
    pub fn status_with_seq(&self, service: ServiceType, node: NodeId) -> (ServiceStatus, u64) {
        self.find(service, node)
            .map(|r| {
                let st = r.state();
                (st.status, st.seq)
            })
            .unwrap_or_default()
    }

    /// Sets the status if the lifecycle allows the move.
    ///
    /// Returns `true` when the status was applied (including no-op writes of the
    /// same value), `false` when the transition was rejected.
    pub fn set_status(&self, service: ServiceType, node: NodeId, status: ServiceStatus) -> bool {
        let rec = self.record(service, node);
        let mut st = rec.state();
        if st.status == status {
            return true;
        }
        if !st.status.can_transition_to(status) {
            debug!(%service, node_id = node, from = %st.status, to = %status, "rejected status transition");
            return false;
        }
        st.status = status;
        st.seq = self.next_seq();
        true
    }

    /// Marks a successful boot: records the boot time.
    pub fn mark_booted(&self, service: ServiceType, node: NodeId) {
        self.record(service, node).state().boot_time = Some(Utc::now());
    }

    /// Tries to take the boot lock without waiting.
    ///
    /// Returns `None` if another boot attempt holds it.
    pub fn try_acquire_boot_lock(&self, service: ServiceType, node: NodeId) -> Option<BootGuard> {
        self.record(service, node).boot_lock.try_acquire()
    }

    /// True while a boot attempt for this record holds the lock.
    pub fn is_booting(&self, service: ServiceType, node: NodeId) -> bool {
        self.find(service, node)
            .is_some_and(|r| r.boot_lock.is_held())
    }

    /// Stores the cancel token of a freshly launched service body.
    ///
    /// A previously stored token is cancelled; a record owns at most one live body.
    pub fn register_cancel(&self, service: ServiceType, node: NodeId, token: CancellationToken) {
        let previous = self.record(service, node).state().cancel.replace(token);
        if let Some(prev) = previous {
            prev.cancel();
        }
    }

    /// Removes and returns the stored cancel token, if any.
    pub fn take_cancel(&self, service: ServiceType, node: NodeId) -> Option<CancellationToken> {
        self.find(service, node).and_then(|r| r.state().cancel.take())
    }

    /// Tears down the subscription of a record: cancels any stored token and marks it `Inactive`.
    ///
    /// Unknown records are left alone (no record is created).
    pub fn remove_subscription(&self, service: ServiceType, node: NodeId) {
        let Some(rec) = self.find(service, node) else {
            return;
        };
        if let Some(token) = rec.state().cancel.take() {
            token.cancel();
        }
        self.set_status(service, node, ServiceStatus::Inactive);
    }

    /// Cancels a running service.
    ///
    /// The stored cancel token is invoked exactly once and cleared. When a running
    /// service was cancelled, `forced` becomes the enforced status for its next boot
    /// and `no_delay` decides how fast it restarts. The record is marked `Inactive`
    /// either way.
    ///
    /// Returns `true` if a running service was cancelled.
    pub fn cancel(
        &self,
        service: ServiceType,
        node: NodeId,
        forced: Option<ServiceStatus>,
        no_delay: bool,
    ) -> bool {
        let rec = self.record(service, node);
        let token = {
            let mut st = rec.state();
            let token = st.cancel.take();
            if token.is_some() {
                if forced.is_some() {
                    st.enforced_status = forced;
                }
                st.no_delay = no_delay;
            }
            token
        };
        self.set_status(service, node, ServiceStatus::Inactive);
        match token {
            Some(t) => {
                t.cancel();
                true
            }
            None => false,
        }
    }

    /// Reads and clears the no-delay flag.
    pub fn take_no_delay(&self, service: ServiceType, node: NodeId) -> bool {
        self.find(service, node)
            .is_some_and(|r| std::mem::take(&mut r.state().no_delay))
    }

    pub fn set_enforced_status(&self, service: ServiceType, node: NodeId, status: ServiceStatus) {
        self.record(service, node).state().enforced_status = Some(status);
    }

    /// Reads and clears the enforced status override.
    pub fn take_enforced_status(&self, service: ServiceType, node: NodeId) -> Option<ServiceStatus> {
        self.find(service, node)
            .and_then(|r| r.state().enforced_status.take())
    }

    /// Returns the status of one node-link sub-stream, `Inactive` if never reported.
    pub fn stream_status(&self, node: NodeId, stream: SubscriptionStream) -> ServiceStatus {
        self.find(ServiceType::NodeLinkService, node)
            .and_then(|r| r.state().streams.get(&stream).copied())
            .unwrap_or_default()
    }

    pub fn set_stream_status(&self, node: NodeId, stream: SubscriptionStream, status: ServiceStatus) {
        self.record(ServiceType::NodeLinkService, node)
            .state()
            .streams
            .insert(stream, status);
    }

    /// Marks every sub-stream of a node `Inactive`.
    pub fn reset_streams(&self, node: NodeId) {
        if let Some(rec) = self.find(ServiceType::NodeLinkService, node) {
            for status in rec.state().streams.values_mut() {
                *status = ServiceStatus::Inactive;
            }
        }
    }

    /// Returns the sorted node ids that have a record for `service`.
    pub fn node_ids(&self, service: ServiceType) -> Vec<NodeId> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<NodeId> = records
            .keys()
            .filter(|(t, _)| *t == service)
            .map(|(_, n)| *n)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Returns a sorted snapshot of every known record.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let records: Vec<((ServiceType, NodeId), Arc<ServiceRecord>)> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect();
        let mut out: Vec<ServiceSnapshot> = records
            .into_iter()
            .map(|((service, node_id), rec)| {
                let st = rec.state();
                ServiceSnapshot {
                    service,
                    node_id,
                    status: st.status,
                    boot_time: st.boot_time,
                    booting: rec.boot_lock.is_held(),
                }
            })
            .collect();
        out.sort_by_key(|s| (s.service, s.node_id));
        out
    }

    /// Returns `type/node` labels of records that still own a cancel token.
    pub fn running(&self) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<String> = records
            .iter()
            .filter(|(_, rec)| rec.state().cancel.is_some())
            .map(|((t, n), _)| format!("{t}/{n}"))
            .collect();
        out.sort_unstable();
        out
    }

    /// Marks every record that still owns a live body `TimedOut`.
    ///
    /// Used when bodies outlive the shutdown grace period.
    pub fn time_out_running(&self) {
        let stuck: Vec<(ServiceType, NodeId)> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, rec)| rec.state().cancel.is_some())
            .map(|(key, _)| *key)
            .collect();
        for (service, node) in stuck {
            self.set_status(service, node, ServiceStatus::TimedOut);
        }
    }
}
