//! Client half of reelpilot: a local optimistic [`TimelineStore`] kept in step
//! with the project server through a background sync worker and the push
//! channel, plus the dispatcher that turns editor intents into store edits or
//! render tasks.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod subscription;
pub mod sync;

pub use error::{ClientError, Result};
pub use session::Session;

use reelpilot_core::store::TimelineStore;
use std::sync::{Arc, Mutex, MutexGuard};

/// The store shared between the editor, the sync worker and the subscription.
/// The lock is never held across an await point.
pub type SharedStore = Arc<Mutex<TimelineStore>>;

pub fn shared(store: TimelineStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Store mutations are all-or-nothing, so a poisoned lock still guards a
/// consistent store.
pub(crate) fn lock(store: &SharedStore) -> MutexGuard<'_, TimelineStore> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}
