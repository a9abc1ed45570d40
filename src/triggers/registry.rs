//! # Trigger registry: at most one live executor per channel key.
//!
//! A single actor task owns the executor map; every caller goes through
//! [`TriggerRegistry`], a cloneable handle that sends one message per operation and
//! waits on its own `oneshot` reply.
//!
//! ```text
//! handle.write(exec) ──► mpsc ──► actor loop ──► HashMap<TriggerKey, Arc<TriggerExecutor>>
//!        ▲                              │
//!        └──────────── oneshot ◄────────┘
//! ```
//!
//! ## Keys
//! An executor is stored under `(origin, origin_id, channel_id)` for each non-zero
//! channel id of its request (incoming and/or outgoing). A request whose channel ids
//! are both zero is invalid.
//!
//! ## Rules
//! - `write` never replaces: if any key of the new executor is occupied it returns `false`.
//! - Cancelling an executor cancels its token once and drops every key that points to it.
//! - `origin_id == 0` turns the cancel operations into no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::balance::ChannelId;
use crate::error::TriggerError;

/// Logical source of an executor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerOrigin {
    /// Requested by an operator.
    Manual,
    /// Requested by an automation workflow.
    Workflow,
}

/// Id of the requesting entity within its origin (e.g. a workflow version node id).
pub type OriginId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorStatus {
    #[default]
    Pending,
    Active,
    Inactive,
}

/// What an executor was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub origin: TriggerOrigin,
    pub origin_id: OriginId,
    pub origin_reference: String,
    pub incoming_channel_id: ChannelId,
    pub outgoing_channel_id: ChannelId,
    pub amount_msat: u64,
}

impl TriggerRequest {
    /// Non-zero channel ids of the request.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        [self.incoming_channel_id, self.outgoing_channel_id]
            .into_iter()
            .filter(|id| *id != 0)
    }

    fn keys(&self) -> Vec<TriggerKey> {
        let mut keys: Vec<TriggerKey> = self
            .channel_ids()
            .map(|channel_id| TriggerKey::new(self.origin, self.origin_id, channel_id))
            .collect();
        keys.dedup();
        keys
    }
}

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub origin: TriggerOrigin,
    pub origin_id: OriginId,
    pub channel_id: ChannelId,
}

impl TriggerKey {
    pub fn new(origin: TriggerOrigin, origin_id: OriginId, channel_id: ChannelId) -> Self {
        Self {
            origin,
            origin_id,
            channel_id,
        }
    }
}

/// A running, cancellable unit of trigger-driven work.
#[derive(Debug)]
pub struct TriggerExecutor {
    request: TriggerRequest,
    status: Mutex<ExecutorStatus>,
    token: CancellationToken,
}

impl TriggerExecutor {
    pub fn new(request: TriggerRequest, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            request,
            status: Mutex::new(ExecutorStatus::Pending),
            token,
        })
    }

    pub fn request(&self) -> &TriggerRequest {
        &self.request
    }

    pub fn status(&self) -> ExecutorStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: ExecutorStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Token observed by the executor's work.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn cancel(&self) {
        self.set_status(ExecutorStatus::Inactive);
        self.token.cancel();
    }
}

enum Op {
    Read {
        origin: TriggerOrigin,
        origin_id: OriginId,
        incoming_channel_id: ChannelId,
        outgoing_channel_id: ChannelId,
        reply: oneshot::Sender<Option<Arc<TriggerExecutor>>>,
    },
    ReadAll {
        status: Option<ExecutorStatus>,
        reply: oneshot::Sender<Vec<Arc<TriggerExecutor>>>,
    },
    Write {
        executor: Arc<TriggerExecutor>,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        executor: Arc<TriggerExecutor>,
        reply: oneshot::Sender<()>,
    },
    Cancel {
        key: TriggerKey,
        reply: oneshot::Sender<bool>,
    },
    CancelAllExcept {
        origin: TriggerOrigin,
        origin_id: OriginId,
        keep: Vec<ChannelId>,
        reply: oneshot::Sender<usize>,
    },
    CancelByOriginId {
        origin: TriggerOrigin,
        origin_id: OriginId,
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Default)]
struct ExecutorMap {
    entries: HashMap<TriggerKey, Arc<TriggerExecutor>>,
}

impl ExecutorMap {
    fn apply(&mut self, op: Op) {
        match op {
            Op::Read {
                origin,
                origin_id,
                incoming_channel_id,
                outgoing_channel_id,
                reply,
            } => {
                let _ = reply.send(self.read(origin, origin_id, incoming_channel_id, outgoing_channel_id));
            }
            Op::ReadAll { status, reply } => {
                let _ = reply.send(self.read_all(status));
            }
            Op::Write { executor, reply } => {
                let _ = reply.send(self.write(executor));
            }
            Op::Delete { executor, reply } => {
                self.remove(&executor);
                let _ = reply.send(());
            }
            Op::Cancel { key, reply } => {
                let _ = reply.send(self.cancel(key));
            }
            Op::CancelAllExcept {
                origin,
                origin_id,
                keep,
                reply,
            } => {
                let _ = reply.send(self.cancel_where(origin, origin_id, |id| !keep.contains(&id)));
            }
            Op::CancelByOriginId {
                origin,
                origin_id,
                reply,
            } => {
                let _ = reply.send(self.cancel_where(origin, origin_id, |_| true));
            }
        }
    }

    fn read(
        &self,
        origin: TriggerOrigin,
        origin_id: OriginId,
        incoming: ChannelId,
        outgoing: ChannelId,
    ) -> Option<Arc<TriggerExecutor>> {
        let mut found = None;
        for channel_id in [incoming, outgoing].into_iter().filter(|id| *id != 0) {
            found = Some(Arc::clone(
                self.entries.get(&TriggerKey::new(origin, origin_id, channel_id))?,
            ));
        }
        found
    }

    fn read_all(&self, status: Option<ExecutorStatus>) -> Vec<Arc<TriggerExecutor>> {
        let mut out: Vec<Arc<TriggerExecutor>> = Vec::new();
        for exec in self.entries.values() {
            if status.is_some_and(|s| s != exec.status()) {
                continue;
            }
            if !out.iter().any(|e| Arc::ptr_eq(e, exec)) {
                out.push(Arc::clone(exec));
            }
        }
        out
    }

    fn write(&mut self, executor: Arc<TriggerExecutor>) -> bool {
        let keys = executor.request().keys();
        if keys.iter().any(|k| self.entries.contains_key(k)) {
            return false;
        }
        for key in keys {
            self.entries.insert(key, Arc::clone(&executor));
        }
        true
    }

    fn remove(&mut self, executor: &Arc<TriggerExecutor>) {
        self.entries.retain(|_, e| !Arc::ptr_eq(e, executor));
    }

    fn cancel(&mut self, key: TriggerKey) -> bool {
        if key.origin_id == 0 {
            return false;
        }
        let Some(exec) = self.entries.get(&key).cloned() else {
            return false;
        };
        debug!(channel_id = key.channel_id, origin = ?key.origin, origin_id = key.origin_id, "cancelling executor");
        exec.cancel();
        self.remove(&exec);
        true
    }

    fn cancel_where(
        &mut self,
        origin: TriggerOrigin,
        origin_id: OriginId,
        mut select: impl FnMut(ChannelId) -> bool,
    ) -> usize {
        if origin_id == 0 {
            return 0;
        }
        let keys: Vec<TriggerKey> = self
            .entries
            .keys()
            .filter(|k| k.origin == origin && k.origin_id == origin_id && select(k.channel_id))
            .copied()
            .collect();
        keys.into_iter().filter(|k| self.cancel(*k)).count()
    }
}

/// Cloneable handle to the trigger registry actor.
#[derive(Clone, Debug)]
pub struct TriggerRegistry {
    tx: mpsc::Sender<Op>,
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Op::Read { .. } => "Read",
            Op::ReadAll { .. } => "ReadAll",
            Op::Write { .. } => "Write",
            Op::Delete { .. } => "Delete",
            Op::Cancel { .. } => "Cancel",
            Op::CancelAllExcept { .. } => "CancelAllExcept",
            Op::CancelByOriginId { .. } => "CancelByOriginId",
        };
        f.write_str(name)
    }
}

impl TriggerRegistry {
    /// Spawns the actor; it stops when `token` is cancelled or every handle is dropped.
    pub fn spawn(capacity: usize, token: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<Op>(capacity.max(1));
        tokio::spawn(async move {
            let mut map = ExecutorMap::default();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    op = rx.recv() => match op {
                        Some(op) => map.apply(op),
                        None => break,
                    },
                }
            }
            debug!(executors = map.entries.len(), "trigger registry stopped");
        });
        Self { tx }
    }

    async fn call<T>(&self, op: impl FnOnce(oneshot::Sender<T>) -> Op) -> Result<T, TriggerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(op(reply))
            .await
            .map_err(|_| TriggerError::RegistryClosed)?;
        rx.await.map_err(|_| TriggerError::RegistryClosed)
    }

    /// Executor stored under the given channel ids; both must match when both are set.
    pub async fn read(
        &self,
        origin: TriggerOrigin,
        origin_id: OriginId,
        incoming_channel_id: ChannelId,
        outgoing_channel_id: ChannelId,
    ) -> Result<Option<Arc<TriggerExecutor>>, TriggerError> {
        if incoming_channel_id == 0 && outgoing_channel_id == 0 {
            error!("incoming and outgoing channel id cannot both be 0");
            return Err(TriggerError::InvalidKey);
        }
        self.call(|reply| Op::Read {
            origin,
            origin_id,
            incoming_channel_id,
            outgoing_channel_id,
            reply,
        })
        .await
    }

    /// Every live executor, optionally filtered by status.
    pub async fn read_all(&self, status: Option<ExecutorStatus>) -> Result<Vec<Arc<TriggerExecutor>>, TriggerError> {
        self.call(|reply| Op::ReadAll { status, reply }).await
    }

    /// Stores an executor. Returns `false` if one of its keys is already taken.
    pub async fn write(&self, executor: Arc<TriggerExecutor>) -> Result<bool, TriggerError> {
        if executor.request().channel_ids().next().is_none() {
            error!("incoming and outgoing channel id cannot both be 0");
            return Err(TriggerError::InvalidKey);
        }
        self.call(|reply| Op::Write { executor, reply }).await
    }

    /// Removes an executor without cancelling it (used when it finished on its own).
    pub async fn delete(&self, executor: Arc<TriggerExecutor>) -> Result<(), TriggerError> {
        self.call(|reply| Op::Delete { executor, reply }).await
    }

    /// Cancels the executor stored under one key. Returns `true` if one was cancelled.
    pub async fn cancel(
        &self,
        origin: TriggerOrigin,
        origin_id: OriginId,
        channel_id: ChannelId,
    ) -> Result<bool, TriggerError> {
        let key = TriggerKey::new(origin, origin_id, channel_id);
        self.call(|reply| Op::Cancel { key, reply }).await
    }

    /// Cancels every executor of `(origin, origin_id)` not stored under a kept channel id.
    pub async fn cancel_all_except(
        &self,
        origin: TriggerOrigin,
        origin_id: OriginId,
        keep: &[ChannelId],
    ) -> Result<usize, TriggerError> {
        let keep = keep.to_vec();
        self.call(|reply| Op::CancelAllExcept {
            origin,
            origin_id,
            keep,
            reply,
        })
        .await
    }

    /// Cancels every executor of each listed origin id.
    pub async fn cancel_all_by_origin_id(
        &self,
        origin: TriggerOrigin,
        origin_ids: &[OriginId],
    ) -> Result<usize, TriggerError> {
        let mut cancelled = 0;
        for &origin_id in origin_ids {
            cancelled += self
                .call(|reply| Op::CancelByOriginId {
                    origin,
                    origin_id,
                    reply,
                })
                .await?;
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(origin_id: OriginId, incoming: ChannelId, outgoing: ChannelId) -> Arc<TriggerExecutor> {
        TriggerExecutor::new(
            TriggerRequest {
                origin: TriggerOrigin::Workflow,
                origin_id,
                origin_reference: format!("ref-{origin_id}"),
                incoming_channel_id: incoming,
                outgoing_channel_id: outgoing,
                amount_msat: 100_000,
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_write_rejects_occupied_key_until_cancelled() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let first = executor(3, 101, 0);
        assert!(reg.write(Arc::clone(&first)).await.unwrap());
        assert!(!reg.write(executor(3, 101, 0)).await.unwrap());

        assert!(reg.cancel(TriggerOrigin::Workflow, 3, 101).await.unwrap());
        assert!(first.token().is_cancelled());
        assert_eq!(first.status(), ExecutorStatus::Inactive);
        assert!(reg.write(executor(3, 101, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_frees_key_without_cancelling() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let exec = executor(3, 0, 202);
        assert!(reg.write(Arc::clone(&exec)).await.unwrap());
        reg.delete(Arc::clone(&exec)).await.unwrap();
        assert!(!exec.token().is_cancelled());
        assert!(reg.write(executor(3, 0, 202)).await.unwrap());
    }

    #[tokio::test]
    async fn test_both_channel_ids_zero_is_invalid() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        assert!(matches!(reg.write(executor(3, 0, 0)).await, Err(TriggerError::InvalidKey)));
        assert!(matches!(
            reg.read(TriggerOrigin::Workflow, 3, 0, 0).await,
            Err(TriggerError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn test_read_requires_both_keys_when_both_given() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let exec = executor(5, 11, 22);
        assert!(reg.write(Arc::clone(&exec)).await.unwrap());

        let hit = reg.read(TriggerOrigin::Workflow, 5, 11, 22).await.unwrap();
        assert!(hit.is_some_and(|e| Arc::ptr_eq(&e, &exec)));
        assert!(reg.read(TriggerOrigin::Workflow, 5, 11, 33).await.unwrap().is_none());
        assert!(reg.read(TriggerOrigin::Manual, 5, 11, 0).await.unwrap().is_none());
        assert_eq!(reg.read_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_except_keeps_listed_channels() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let keep = executor(3, 101, 0);
        let drop_a = executor(3, 102, 0);
        let drop_b = executor(3, 103, 0);
        let other = executor(4, 102, 0);
        for e in [&keep, &drop_a, &drop_b, &other] {
            assert!(reg.write(Arc::clone(e)).await.unwrap());
        }

        assert_eq!(reg.cancel_all_except(TriggerOrigin::Workflow, 3, &[101]).await.unwrap(), 2);
        assert!(!keep.token().is_cancelled());
        assert!(drop_a.token().is_cancelled());
        assert!(drop_b.token().is_cancelled());
        assert!(!other.token().is_cancelled());
        assert!(reg.read(TriggerOrigin::Workflow, 3, 101, 0).await.unwrap().is_some());
        assert!(reg.read(TriggerOrigin::Workflow, 3, 102, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_origin_id_zero_cancels_nothing() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let exec = executor(0, 7, 0);
        assert!(reg.write(Arc::clone(&exec)).await.unwrap());
        assert!(!reg.cancel(TriggerOrigin::Workflow, 0, 7).await.unwrap());
        assert_eq!(reg.cancel_all_by_origin_id(TriggerOrigin::Workflow, &[0]).await.unwrap(), 0);
        assert!(!exec.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_by_origin_ids_and_status_filter() {
        let reg = TriggerRegistry::spawn(8, CancellationToken::new());
        let a = executor(1, 10, 0);
        let b = executor(2, 20, 21);
        let c = executor(9, 30, 0);
        a.set_status(ExecutorStatus::Active);
        for e in [&a, &b, &c] {
            assert!(reg.write(Arc::clone(e)).await.unwrap());
        }
        assert_eq!(reg.read_all(Some(ExecutorStatus::Active)).await.unwrap().len(), 1);

        reg.cancel_all_by_origin_id(TriggerOrigin::Workflow, &[1, 2]).await.unwrap();
        assert!(a.token().is_cancelled() && b.token().is_cancelled());
        assert!(!c.token().is_cancelled());
        assert_eq!(reg.read_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_registry_reports_error() {
        let token = CancellationToken::new();
        let reg = TriggerRegistry::spawn(8, token.clone());
        token.cancel();
        tokio::task::yield_now().await;
        let mut closed = false;
        for _ in 0..10 {
            if matches!(reg.read_all(None).await, Err(TriggerError::RegistryClosed)) {
                closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }
}
