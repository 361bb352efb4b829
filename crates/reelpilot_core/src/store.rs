//! Client-side optimistic timeline store.
//!
//! Every accepted mutation is applied locally first, stamped with a sequence
//! number and queued as pending `SyncOp`s until the server confirms it.
//! Broadcast timelines are reconciled by replaying still-pending ops on top.

use crate::editing::SplitOutcome;
use crate::error::{CoreError, Result};
use crate::project::write_json_atomic;
use crate::snapping::{self, SnapSettings};
use crate::sync::SyncOp;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 20.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub track_id: Option<String>,
    pub clip_id: Option<String>,
}

/// One accepted local mutation and the ops that reproduce it remotely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mutation {
    pub seq: u64,
    pub ops: Vec<SyncOp>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    project_id: &'a str,
    timeline: &'a Timeline,
    selection: &'a Selection,
    pending: &'a VecDeque<Mutation>,
    next_seq: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    project_id: String,
    timeline: Timeline,
    #[serde(default)]
    selection: Selection,
    #[serde(default)]
    pending: VecDeque<Mutation>,
    #[serde(default)]
    next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct TimelineStore {
    project_id: String,
    timeline: Timeline,
    selection: Selection,
    playhead: f64,
    zoom: f64,
    snap: SnapSettings,
    next_seq: u64,
    pending: VecDeque<Mutation>,
    snapshot_path: Option<PathBuf>,
}

impl TimelineStore {
    pub fn new(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self::with_timeline(Timeline::new(project_id))
    }

    pub fn with_timeline(mut timeline: Timeline) -> Self {
        timeline.refresh_duration();
        Self {
            project_id: timeline.id.clone(),
            timeline,
            selection: Selection::default(),
            playhead: 0.0,
            zoom: 1.0,
            snap: SnapSettings::default(),
            next_seq: 1,
            pending: VecDeque::new(),
            snapshot_path: None,
        }
    }

    /// Persist a snapshot to `path` after every mutation.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Load a previously written snapshot. Subsequent mutations keep writing to `path`.
    pub fn restore(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        if snapshot.timeline.id != snapshot.project_id {
            return Err(CoreError::InvalidOperation(format!(
                "snapshot timeline {} does not belong to project {}",
                snapshot.timeline.id, snapshot.project_id
            )));
        }

        let next_seq = snapshot
            .pending
            .iter()
            .map(|m| m.seq + 1)
            .max()
            .unwrap_or(1)
            .max(snapshot.next_seq);

        let mut store = Self::with_timeline(snapshot.timeline).with_snapshot_path(path);
        store.selection = snapshot.selection;
        store.pending = snapshot.pending;
        store.next_seq = next_seq;
        store.fix_selection();
        Ok(store)
    }

    /// Restore from `path` when it holds a snapshot of `project_id`, otherwise
    /// start from a default timeline.
    pub fn open(project_id: &str, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::restore(path) {
                Ok(store) if store.project_id == project_id => return store,
                Ok(store) => debug!(
                    snapshot_project = %store.project_id,
                    project_id,
                    "Snapshot belongs to another project, starting fresh"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to restore snapshot"),
            }
        }
        Self::new(project_id).with_snapshot_path(path)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected_clip(&self) -> Option<(&Track, &Clip)> {
        let clip_id = self.selection.clip_id.as_deref()?;
        self.timeline.find_clip(clip_id)
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn snap_settings(&self) -> &SnapSettings {
        &self.snap
    }

    pub fn pending(&self) -> impl Iterator<Item = &Mutation> {
        self.pending.iter()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // -----------------------------------------------------------------------
    // View state
    // -----------------------------------------------------------------------

    pub fn select(&mut self, track_id: &str, clip_id: &str) -> Result<()> {
        let track = self
            .timeline
            .track(track_id)
            .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))?;
        if track.clip(clip_id).is_none() {
            return Err(CoreError::ClipNotFound(clip_id.to_string()));
        }
        self.selection = Selection {
            track_id: Some(track_id.to_string()),
            clip_id: Some(clip_id.to_string()),
        };
        self.persist();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::default();
        self.persist();
    }

    /// Move the playhead, clamped to `>= 0`. Returns the applied value.
    pub fn set_playhead(&mut self, time: f64) -> f64 {
        if time.is_finite() {
            self.playhead = time.max(0.0);
        }
        self.playhead
    }

    pub fn set_zoom(&mut self, zoom: f64) -> f64 {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self.zoom
    }

    pub fn set_snap_settings(&mut self, settings: SnapSettings) {
        self.snap = settings;
    }

    pub fn snap_time(&self, time: f64, exclude_clip: Option<&str>) -> f64 {
        snapping::snap(time, &self.timeline, exclude_clip, self.playhead, &self.snap)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn add_clip(&mut self, track_id: &str, clip: Clip) -> Result<Mutation> {
        self.timeline.add_clip(track_id, clip.clone())?;
        Ok(self.commit(vec![SyncOp::AddClip {
            track_id: track_id.to_string(),
            clip,
        }]))
    }

    pub fn update_clip(&mut self, track_id: &str, clip_id: &str, patch: ClipPatch) -> Result<Mutation> {
        self.timeline.update_clip(track_id, clip_id, &patch)?;
        Ok(self.commit(vec![SyncOp::UpdateClip {
            track_id: track_id.to_string(),
            clip_id: clip_id.to_string(),
            patch,
        }]))
    }

    pub fn resize_clip(
        &mut self,
        track_id: &str,
        clip_id: &str,
        new_start: f64,
        new_end: f64,
    ) -> Result<Mutation> {
        self.update_clip(track_id, clip_id, ClipPatch::bounds(new_start, new_end))
    }

    /// Delete a clip, clearing the selection when it pointed at it.
    pub fn remove_clip(&mut self, track_id: &str, clip_id: &str) -> Result<Mutation> {
        self.timeline.remove_clip(track_id, clip_id)?;
        if self.selection.clip_id.as_deref() == Some(clip_id) {
            self.selection = Selection::default();
        }
        Ok(self.commit(vec![SyncOp::RemoveClip {
            track_id: track_id.to_string(),
            clip_id: clip_id.to_string(),
        }]))
    }

    /// Move a clip and select it on its destination track.
    pub fn move_clip(
        &mut self,
        clip_id: &str,
        from_track: &str,
        to_track: &str,
        new_start: f64,
        new_end: f64,
    ) -> Result<Mutation> {
        self.timeline
            .move_clip(clip_id, from_track, to_track, new_start, new_end)?;

        let ops = if from_track == to_track {
            vec![SyncOp::UpdateClip {
                track_id: to_track.to_string(),
                clip_id: clip_id.to_string(),
                patch: ClipPatch::bounds(new_start, new_end),
            }]
        } else {
            let mut ops = vec![SyncOp::RemoveClip {
                track_id: from_track.to_string(),
                clip_id: clip_id.to_string(),
            }];
            ops.extend(self.add_op(to_track, clip_id));
            ops
        };

        self.selection = Selection {
            track_id: Some(to_track.to_string()),
            clip_id: Some(clip_id.to_string()),
        };
        Ok(self.commit(ops))
    }

    /// Split the selected clip at `time`; the right segment becomes selected.
    pub fn split_selected_at(&mut self, time: f64) -> Result<Mutation> {
        let (track_id, clip_id) = match (&self.selection.track_id, &self.selection.clip_id) {
            (Some(t), Some(c)) => (t.clone(), c.clone()),
            _ => {
                return Err(CoreError::InvalidOperation(
                    "no clip selected to split".into(),
                ))
            }
        };
        self.split_clip_at(&track_id, &clip_id, time)
    }

    pub fn split_clip_at(&mut self, track_id: &str, clip_id: &str, time: f64) -> Result<Mutation> {
        let outcome = self.timeline.split_clip(track_id, clip_id, time)?;
        let ops = self.split_ops(&outcome);
        self.selection = Selection {
            track_id: Some(outcome.track_id),
            clip_id: Some(outcome.right),
        };
        Ok(self.commit(ops))
    }

    pub fn add_track(&mut self, kind: TrackKind) -> (String, Mutation) {
        let track_id = self.timeline.add_track(kind);
        let mutation = self.commit(vec![SyncOp::AddTrack {
            track_id: track_id.clone(),
            kind,
        }]);
        (track_id, mutation)
    }

    pub fn toggle_track_mute(&mut self, track_id: &str) -> Result<Mutation> {
        let muted = !self.track_flags(track_id)?.muted;
        self.set_track_flags(track_id, TrackPatch { muted: Some(muted), ..Default::default() })
    }

    pub fn toggle_track_hidden(&mut self, track_id: &str) -> Result<Mutation> {
        let hidden = !self.track_flags(track_id)?.hidden;
        self.set_track_flags(track_id, TrackPatch { hidden: Some(hidden), ..Default::default() })
    }

    pub fn toggle_track_locked(&mut self, track_id: &str) -> Result<Mutation> {
        let locked = !self.track_flags(track_id)?.locked;
        self.set_track_flags(track_id, TrackPatch { locked: Some(locked), ..Default::default() })
    }

    // -----------------------------------------------------------------------
    // Sync bookkeeping
    // -----------------------------------------------------------------------

    /// Drop pending mutations up to and including `seq`.
    pub fn confirm(&mut self, seq: u64) {
        while self.pending.front().is_some_and(|m| m.seq <= seq) {
            self.pending.pop_front();
        }
        self.persist();
    }

    /// Adopt a broadcast timeline and replay still-pending local ops on top.
    /// Ops that no longer apply are skipped.
    pub fn apply_remote(&mut self, timeline: Timeline) {
        if timeline.id != self.project_id {
            debug!(
                project_id = %self.project_id,
                remote = %timeline.id,
                "Ignoring timeline for another project"
            );
            return;
        }

        let mut next = timeline;
        for mutation in &self.pending {
            if let Err(e) = next.apply_all(&mutation.ops) {
                debug!(seq = mutation.seq, error = %e, "Pending mutation no longer applies");
            }
        }
        next.refresh_duration();

        self.timeline = next;
        self.fix_selection();
        self.persist();
    }

    fn commit(&mut self, ops: Vec<SyncOp>) -> Mutation {
        let mutation = Mutation {
            seq: self.next_seq,
            ops,
        };
        self.next_seq += 1;
        self.pending.push_back(mutation.clone());
        self.persist();
        mutation
    }

    fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = SnapshotRef {
            project_id: &self.project_id,
            timeline: &self.timeline,
            selection: &self.selection,
            pending: &self.pending,
            next_seq: self.next_seq,
        };
        if let Err(e) = write_json_atomic(path, &snapshot) {
            warn!(path = %path.display(), error = %e, "Failed to write timeline snapshot");
        }
    }

    fn fix_selection(&mut self) {
        let Some(clip_id) = self.selection.clip_id.clone() else {
            return;
        };
        match self.timeline.find_clip(&clip_id) {
            Some((track, _)) => self.selection.track_id = Some(track.id.clone()),
            None => self.selection = Selection::default(),
        }
    }

    fn track_flags(&self, track_id: &str) -> Result<&Track> {
        self.timeline
            .track(track_id)
            .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))
    }

    fn set_track_flags(&mut self, track_id: &str, patch: TrackPatch) -> Result<Mutation> {
        self.timeline.update_track(track_id, patch)?;
        Ok(self.commit(vec![SyncOp::UpdateTrack {
            track_id: track_id.to_string(),
            patch,
        }]))
    }

    fn add_op(&self, track_id: &str, clip_id: &str) -> Option<SyncOp> {
        let clip = self.timeline.track(track_id)?.clip(clip_id)?;
        Some(SyncOp::AddClip {
            track_id: track_id.to_string(),
            clip: clip.clone(),
        })
    }

    fn segment_op(&self, track_id: &str, original: &str, left: &str, right: &str) -> Option<SyncOp> {
        let track = self.timeline.track(track_id)?;
        Some(SyncOp::SplitClip {
            track_id: track_id.to_string(),
            clip_id: original.to_string(),
            left: track.clip(left)?.clone(),
            right: track.clip(right)?.clone(),
        })
    }

    fn split_ops(&self, outcome: &SplitOutcome) -> Vec<SyncOp> {
        let mut ops: Vec<SyncOp> = self
            .segment_op(&outcome.track_id, &outcome.original, &outcome.left, &outcome.right)
            .into_iter()
            .collect();

        if let Some(linked) = &outcome.linked {
            ops.extend(self.segment_op(
                &linked.track_id,
                &linked.original,
                &linked.left,
                &linked.right,
            ));
        }

        if let Some((track_id, clip_id)) = &outcome.relinked {
            ops.push(SyncOp::UpdateClip {
                track_id: track_id.clone(),
                clip_id: clip_id.clone(),
                patch: ClipPatch {
                    linked_id: Some(Some(outcome.left.clone())),
                    ..Default::default()
                },
            });
        }
        ops
    }
}
