use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::subscription::Subscription;
use crate::sync::{SyncHandle, SyncWorker};
use crate::{lock, shared, SharedStore};
use reelpilot_core::store::TimelineStore;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running client: local store, sync worker and push subscription wired to
/// one dispatcher. Background tasks stop when the session is dropped.
pub struct Session {
    pub store: SharedStore,
    pub dispatcher: Dispatcher,
    pub worker: SyncWorker,
    pub sync: SyncHandle,
    pub connected: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl Session {
    /// Restore the local snapshot, make sure the project exists on the server
    /// and start syncing. An unreachable server is not fatal: the session
    /// starts offline from the snapshot and catches up once connected.
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(&config.base_url, config.request_timeout)?;
        let store = match &config.snapshot_path {
            Some(path) => TimelineStore::open(&config.project_id, path),
            None => TimelineStore::new(config.project_id.clone()),
        };
        let store = shared(store);

        match api.create_or_get_project(&config.project_id).await {
            Ok(timeline) => lock(&store).apply_remote(timeline),
            Err(e) if e.is_retryable() => {
                warn!(project_id = %config.project_id, error = %e, "server unreachable, starting offline");
            }
            Err(e) => return Err(e),
        }

        let cancel = CancellationToken::new();
        let worker = SyncWorker::new(api.clone(), store.clone(), config.retry);
        let sync = worker.handle();
        tokio::spawn(worker.clone().run(cancel.child_token()));

        let subscription =
            Subscription::new(api.clone(), store.clone(), config.retry).with_worker(worker.clone());
        let events = subscription.events();
        let connected = subscription.connected();
        tokio::spawn(subscription.run(cancel.child_token()));

        let dispatcher = Dispatcher::new(api, store.clone(), sync.clone(), &config).with_events(events);
        info!(project_id = %config.project_id, base_url = %config.base_url, "client session started");

        Ok(Self {
            store,
            dispatcher,
            worker,
            sync,
            connected,
            cancel,
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
