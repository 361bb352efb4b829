//! Background worker that pushes pending store mutations to the server.
//!
//! Mutations are sent one batch at a time in sequence order. A batch that
//! keeps failing only moves the worker into `NeedsReconcile`; the local store
//! is never rolled back. A batch that never reached the server is kept and
//! resent once the push channel is back.

use crate::api::ApiClient;
use crate::config::RetryPolicy;
use crate::error::{ClientError, Result};
use crate::{lock, SharedStore};
use reelpilot_core::store::Mutation;
use reelpilot_core::Timeline;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Idle,
    Syncing { seq: u64 },
    Synced { seq: u64 },
    Retrying { seq: u64, attempt: u32, error: String },
    /// `transient` means the batch never got an answer from the server.
    NeedsReconcile { seq: u64, error: String, transient: bool },
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing { .. } => "syncing",
            SyncStatus::Synced { .. } => "synced",
            SyncStatus::Retrying { .. } => "retrying",
            SyncStatus::NeedsReconcile { .. } => "needs_reconcile",
        }
    }
}

/// Cheap handle for code that edits the store: wakes the worker and exposes
/// its status.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    notify: Arc<Notify>,
    status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Tell the worker new mutations are pending.
    pub fn kick(&self) {
        self.notify.notify_one();
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SyncWorker {
    api: ApiClient,
    store: SharedStore,
    project_id: String,
    policy: RetryPolicy,
    notify: Arc<Notify>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl SyncWorker {
    pub fn new(api: ApiClient, store: SharedStore, policy: RetryPolicy) -> Self {
        let project_id = lock(&store).project_id().to_string();
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            api,
            store,
            project_id,
            policy,
            notify: Arc::new(Notify::new()),
            status: Arc::new(status),
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            notify: self.notify.clone(),
            status: self.status.subscribe(),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Drain on startup and after every kick until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(project_id = %self.project_id, "sync worker started");
        loop {
            self.drain(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {}
            }
        }
        info!(project_id = %self.project_id, "sync worker stopped");
    }

    /// Push pending mutations until none remain, a batch needs reconciliation,
    /// or `cancel` fires. Returns the resulting status.
    pub async fn drain(&self, cancel: &CancellationToken) -> SyncStatus {
        loop {
            if let SyncStatus::NeedsReconcile { .. } = self.status() {
                return self.status();
            }

            let next = lock(&self.store).pending().next().cloned();
            let Some(mutation) = next else {
                return self.status();
            };

            self.status.send_replace(SyncStatus::Syncing { seq: mutation.seq });
            let pushed = tokio::select! {
                _ = cancel.cancelled() => return self.status(),
                pushed = self.push(&mutation) => pushed,
            };

            match pushed {
                Ok(timeline) => {
                    let mut store = lock(&self.store);
                    store.confirm(mutation.seq);
                    store.apply_remote(timeline);
                    debug!(project_id = %self.project_id, seq = mutation.seq, "mutation confirmed");
                    self.status.send_replace(SyncStatus::Synced { seq: mutation.seq });
                }
                Err(e) => {
                    warn!(
                        project_id = %self.project_id,
                        seq = mutation.seq,
                        error = %e,
                        "mutation could not be synced, local edits kept"
                    );
                    self.status.send_replace(SyncStatus::NeedsReconcile {
                        seq: mutation.seq,
                        error: e.to_string(),
                        transient: e.is_retryable(),
                    });
                }
            }
        }
    }

    async fn push(&self, mutation: &Mutation) -> Result<Timeline> {
        let mut attempt = 0;
        loop {
            match self.api.apply_ops(&self.project_id, &mutation.ops).await {
                Ok(timeline) => return Ok(timeline),
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    attempt += 1;
                    debug!(seq = mutation.seq, attempt, "sync failed, retrying in {delay:?}: {e}");
                    self.status.send_replace(SyncStatus::Retrying {
                        seq: mutation.seq,
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Adopt the server's timeline after a failed batch. A rejected batch is
    /// dropped from the pending queue (the server either applied it or never
    /// will); one that never reached the server stays queued. Pending batches
    /// are replayed and syncing resumes. The project is created if the server
    /// has never seen it.
    pub async fn reconcile(&self) -> Result<()> {
        let SyncStatus::NeedsReconcile { seq, transient, .. } = self.status() else {
            return Err(ClientError::InvalidOperation(format!(
                "nothing to reconcile, sync is {}",
                self.status().as_str()
            )));
        };

        let timeline = self.api.create_or_get_project(&self.project_id).await?;
        {
            let mut store = lock(&self.store);
            if !transient {
                store.confirm(seq);
            }
            store.apply_remote(timeline);
        }
        info!(project_id = %self.project_id, seq, transient, "reconciled with server timeline");
        self.status.send_replace(SyncStatus::Idle);
        self.notify.notify_one();
        Ok(())
    }

    /// Called once the server is reachable again. Reconciles a batch that
    /// failed only for lack of a connection, otherwise just wakes the worker.
    pub async fn resume(&self) -> Result<()> {
        match self.status() {
            SyncStatus::NeedsReconcile {
                transient: true, ..
            } => self.reconcile().await,
            _ => {
                self.notify.notify_one();
                Ok(())
            }
        }
    }
}
