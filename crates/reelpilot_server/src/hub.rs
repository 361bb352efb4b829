use reelpilot_core::sync::{Envelope, SyncEvent, TaskRecord};
use reelpilot_render::probe::media_kind;
use reelpilot_render::queue::RenderEvents;
use std::path::Path;
use tokio::sync::broadcast;

pub const BROADCAST_CAPACITY: usize = 1024;

/// Fan-out point for every push-channel event. Each socket holds a receiver.
#[derive(Debug, Clone)]
pub struct SyncHub {
    tx: broadcast::Sender<Envelope>,
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl SyncHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        let kind = event.kind();
        match self.tx.send(Envelope::now(event)) {
            Ok(receivers) => tracing::debug!(kind, receivers, "broadcast"),
            Err(_) => tracing::debug!(kind, "broadcast with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RenderEvents for SyncHub {
    fn progress(&self, task_id: &str, operation: &str, percent: f64) {
        self.publish(SyncEvent::Progress {
            operation: operation.to_string(),
            percent,
            task_id: Some(task_id.to_string()),
        });
    }

    fn task_updated(&self, task: &TaskRecord) {
        self.publish(SyncEvent::TaskUpdated { task: task.clone() });
    }

    fn file_added(&self, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.publish(SyncEvent::FileAdded {
            path: path.to_string_lossy().into_owned(),
            kind: media_kind(path).to_string(),
            name,
        });
    }
}
