//! Push-channel subscription keeping the local store converged with the server.
//!
//! Every (re)connect starts with a full create-or-get fetch, since the server
//! does not replay events missed while disconnected and may never have seen
//! a project that was started offline.

use crate::api::ApiClient;
use crate::config::RetryPolicy;
use crate::error::Result;
use crate::sync::SyncWorker;
use crate::{lock, SharedStore};
use futures::StreamExt;
use reelpilot_core::sync::{Envelope, SyncEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Subscription {
    api: ApiClient,
    store: SharedStore,
    project_id: String,
    policy: RetryPolicy,
    events: broadcast::Sender<SyncEvent>,
    connected: Arc<watch::Sender<bool>>,
    worker: Option<SyncWorker>,
}

impl Subscription {
    pub fn new(api: ApiClient, store: SharedStore, policy: RetryPolicy) -> Self {
        let project_id = lock(&store).project_id().to_string();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (connected, _) = watch::channel(false);
        Self {
            api,
            store,
            project_id,
            policy,
            events,
            connected: Arc::new(connected),
            worker: None,
        }
    }

    /// Resume `worker` after every successful resync.
    pub fn with_worker(mut self, worker: SyncWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Every event received, re-published for other consumers such as task watchers.
    pub fn events(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Stay connected until cancelled, backing off between failed attempts.
    pub async fn run(self, cancel: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.session(&mut failures) => outcome,
            };
            self.connected.send_replace(false);
            match outcome {
                Ok(()) => info!(project_id = %self.project_id, "push channel closed"),
                Err(e) => warn!(project_id = %self.project_id, error = %e, "push channel failed"),
            }

            let delay = self.policy.delay(failures);
            failures = failures.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.connected.send_replace(false);
    }

    async fn session(&self, failures: &mut u32) -> Result<()> {
        let (mut socket, _) = tokio_tungstenite::connect_async(self.api.ws_url()?).await?;

        // The server subscribes us before it says hello, so fetching after
        // `connected` cannot miss an update.
        loop {
            let Some(msg) = socket.next().await else {
                return Ok(());
            };
            if let Message::Text(text) = msg? {
                if let Some(SyncEvent::Connected { client_id }) = self.handle_text(&text) {
                    debug!(client_id = %client_id, "push channel accepted");
                    break;
                }
            }
        }

        let timeline = self.api.create_or_get_project(&self.project_id).await?;
        lock(&self.store).apply_remote(timeline);
        *failures = 0;
        self.connected.send_replace(true);
        info!(project_id = %self.project_id, "push channel connected, timeline resynced");

        if let Some(worker) = &self.worker {
            if let Err(e) = worker.resume().await {
                warn!(project_id = %self.project_id, error = %e, "could not resume syncing");
            }
        }

        while let Some(msg) = socket.next().await {
            match msg? {
                Message::Text(text) => {
                    self.handle_text(&text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Apply timeline updates for this project and fan the event out.
    fn handle_text(&self, text: &str) -> Option<SyncEvent> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("ignoring unreadable push message: {e}");
                return None;
            }
        };

        if let Some(timeline) = envelope.event.timeline_for(&self.project_id) {
            lock(&self.store).apply_remote(timeline.clone());
            debug!(project_id = %self.project_id, kind = envelope.event.kind(), "remote timeline applied");
        }
        // No receivers is fine.
        let _ = self.events.send(envelope.event.clone());
        Some(envelope.event)
    }
}
