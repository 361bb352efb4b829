//! Authoritative project store.
//!
//! Each project id owns a [`ProjectHandle`] whose async mutex serializes
//! read-modify-persist-broadcast, so the broadcast order for a project always
//! matches the order its file was written.

use crate::error::ApiError;
use crate::hub::SyncHub;
use dashmap::DashMap;
use reelpilot_core::project::{tmp_path, validate_project_id};
use reelpilot_core::sync::{SyncEvent, SyncOp};
use reelpilot_core::{
    format_timecode, Clip, ClipPatch, CoreError, ProjectSummary, Timeline, TrackKind, TrackPatch,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default)]
struct ProjectHandle {
    /// `None` until loaded from disk or created.
    timeline: Mutex<Option<Timeline>>,
}

pub struct ProjectService {
    dir: PathBuf,
    projects: DashMap<String, Arc<ProjectHandle>>,
    hub: SyncHub,
}

impl ProjectService {
    pub fn new(dir: impl Into<PathBuf>, hub: SyncHub) -> Self {
        Self {
            dir: dir.into(),
            projects: DashMap::new(),
            hub,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{project_id}.json"))
    }

    fn handle(&self, project_id: &str) -> Result<Arc<ProjectHandle>> {
        validate_project_id(project_id)
            .map_err(|_| ApiError::InvalidProjectId(project_id.to_string()))?;
        // Clone out of the map so no shard lock is held across an await.
        Ok(self
            .projects
            .entry(project_id.to_string())
            .or_default()
            .value()
            .clone())
    }

    /// Handle for a project known in memory or on disk. Unknown ids are a
    /// not-found error and leave no entry behind.
    async fn existing_handle(&self, project_id: &str) -> Result<Arc<ProjectHandle>> {
        validate_project_id(project_id)
            .map_err(|_| ApiError::InvalidProjectId(project_id.to_string()))?;
        if let Some(handle) = self.projects.get(project_id) {
            return Ok(handle.value().clone());
        }
        if !tokio::fs::try_exists(self.path_for(project_id)).await? {
            return Err(CoreError::ProjectNotFound(project_id.to_string()).into());
        }
        self.handle(project_id)
    }

    /// Fill `slot` from disk if it is empty. Returns whether a timeline is present.
    async fn ensure_loaded(&self, project_id: &str, slot: &mut Option<Timeline>) -> Result<bool> {
        if slot.is_some() {
            return Ok(true);
        }
        let bytes = match tokio::fs::read(self.path_for(project_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut timeline: Timeline = serde_json::from_slice(&bytes).map_err(CoreError::from)?;
        timeline.refresh_duration();
        tracing::debug!(project_id, "loaded project from disk");
        *slot = Some(timeline);
        Ok(true)
    }

    async fn persist(&self, timeline: &Timeline) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&timeline.id);
        let tmp = tmp_path(&path);
        let json = serde_json::to_vec_pretty(timeline).map_err(CoreError::from)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn create_or_get(&self, project_id: &str) -> Result<Timeline> {
        let handle = self.handle(project_id)?;
        let mut slot = handle.timeline.lock().await;
        if self.ensure_loaded(project_id, &mut slot).await? {
            if let Some(timeline) = slot.as_ref() {
                return Ok(timeline.clone());
            }
        }

        let timeline = Timeline::new(project_id);
        self.persist(&timeline).await?;
        *slot = Some(timeline.clone());
        tracing::info!(project_id, "project created");
        self.hub.publish(SyncEvent::ProjectCreated {
            project_id: project_id.to_string(),
            timeline: timeline.clone(),
        });
        Ok(timeline)
    }

    pub async fn get(&self, project_id: &str) -> Result<Timeline> {
        let handle = self.existing_handle(project_id).await?;
        let mut slot = handle.timeline.lock().await;
        self.ensure_loaded(project_id, &mut slot).await?;
        slot.clone()
            .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()).into())
    }

    /// Run `edit` on a copy of the project's timeline; on success the copy is
    /// stamped, written, cached and broadcast, all under the project lock.
    async fn mutate<R>(
        &self,
        project_id: &str,
        action: &'static str,
        edit: impl FnOnce(&mut Timeline) -> reelpilot_core::Result<R>,
    ) -> Result<(R, Timeline)> {
        let handle = self.existing_handle(project_id).await?;
        let mut slot = handle.timeline.lock().await;
        self.ensure_loaded(project_id, &mut slot).await?;
        let current = slot
            .as_ref()
            .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()))?;

        let mut next = current.clone();
        let out = edit(&mut next)?;
        next.touch();
        self.persist(&next).await?;
        *slot = Some(next.clone());

        tracing::info!(
            project_id,
            action,
            duration = %format_timecode(next.duration),
            "timeline updated"
        );
        self.hub.publish(SyncEvent::TimelineUpdated {
            project_id: project_id.to_string(),
            timeline: next.clone(),
        });
        Ok((out, next))
    }

    fn log_overlaps(timeline: &Timeline, track_id: &str) {
        if let Ok(pairs) = timeline.overlaps(track_id) {
            if !pairs.is_empty() {
                tracing::debug!(track_id, ?pairs, "track has overlapping clips");
            }
        }
    }

    pub async fn add_clip(&self, project_id: &str, track_id: &str, clip: Clip) -> Result<Timeline> {
        let (_, timeline) = self
            .mutate(project_id, "add_clip", |tl| tl.add_clip(track_id, clip))
            .await?;
        Self::log_overlaps(&timeline, track_id);
        Ok(timeline)
    }

    pub async fn remove_clip(&self, project_id: &str, track_id: &str, clip_id: &str) -> Result<Timeline> {
        self.mutate(project_id, "remove_clip", |tl| tl.remove_clip(track_id, clip_id))
            .await
            .map(|(_, tl)| tl)
    }

    pub async fn update_clip(
        &self,
        project_id: &str,
        track_id: &str,
        clip_id: &str,
        patch: &ClipPatch,
    ) -> Result<Timeline> {
        let (_, timeline) = self
            .mutate(project_id, "update_clip", |tl| tl.update_clip(track_id, clip_id, patch))
            .await?;
        Self::log_overlaps(&timeline, track_id);
        Ok(timeline)
    }

    pub async fn add_track(&self, project_id: &str, kind: TrackKind) -> Result<(String, Timeline)> {
        self.mutate(project_id, "add_track", |tl| Ok(tl.add_track(kind)))
            .await
    }

    pub async fn update_track(
        &self,
        project_id: &str,
        track_id: &str,
        patch: TrackPatch,
    ) -> Result<Timeline> {
        self.mutate(project_id, "update_track", |tl| tl.update_track(track_id, patch))
            .await
            .map(|(_, tl)| tl)
    }

    /// Apply a batch of ops atomically with a single broadcast.
    pub async fn apply_ops(&self, project_id: &str, ops: &[SyncOp]) -> Result<Timeline> {
        let (_, timeline) = self
            .mutate(project_id, "apply_ops", |tl| tl.apply_all(ops))
            .await?;
        for op in ops {
            Self::log_overlaps(&timeline, op.track_id());
        }
        Ok(timeline)
    }

    /// Summaries for every project on disk or in memory, sorted by id.
    pub async fn list(&self) -> Result<Vec<ProjectSummary>> {
        let mut ids: Vec<String> = self.projects.iter().map(|e| e.key().clone()).collect();

        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.push(stem.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        ids.sort();
        ids.dedup();

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            if validate_project_id(&id).is_err() {
                continue;
            }
            match self.get(&id).await {
                Ok(timeline) => summaries.push(ProjectSummary::from(&timeline)),
                Err(ApiError::Core(e)) if e.is_not_found() => {}
                Err(e) => tracing::warn!(project_id = %id, "skipping unreadable project: {e}"),
            }
        }
        Ok(summaries)
    }
}
