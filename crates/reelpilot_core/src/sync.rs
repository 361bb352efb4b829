//! Wire types shared by the project service and its clients: replayable
//! timeline operations, push-channel events and render task records.

use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SyncOp
// ---------------------------------------------------------------------------

/// A single timeline mutation that can be replayed against any copy of the
/// timeline. Client store mutations are expressed as lists of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncOp {
    AddClip {
        track_id: String,
        clip: Clip,
    },
    RemoveClip {
        track_id: String,
        clip_id: String,
    },
    UpdateClip {
        track_id: String,
        clip_id: String,
        patch: ClipPatch,
    },
    /// Replace `clip_id` in place with `left` then `right`.
    SplitClip {
        track_id: String,
        clip_id: String,
        left: Clip,
        right: Clip,
    },
    AddTrack {
        track_id: String,
        kind: TrackKind,
    },
    UpdateTrack {
        track_id: String,
        patch: TrackPatch,
    },
}

impl SyncOp {
    pub fn track_id(&self) -> &str {
        match self {
            SyncOp::AddClip { track_id, .. }
            | SyncOp::RemoveClip { track_id, .. }
            | SyncOp::UpdateClip { track_id, .. }
            | SyncOp::SplitClip { track_id, .. }
            | SyncOp::AddTrack { track_id, .. }
            | SyncOp::UpdateTrack { track_id, .. } => track_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncOp::AddClip { .. } => "add_clip",
            SyncOp::RemoveClip { .. } => "remove_clip",
            SyncOp::UpdateClip { .. } => "update_clip",
            SyncOp::SplitClip { .. } => "split_clip",
            SyncOp::AddTrack { .. } => "add_track",
            SyncOp::UpdateTrack { .. } => "update_track",
        }
    }
}

impl Timeline {
    pub fn apply(&mut self, op: &SyncOp) -> Result<()> {
        match op {
            SyncOp::AddClip { track_id, clip } => self.add_clip(track_id, clip.clone()),
            SyncOp::RemoveClip { track_id, clip_id } => {
                self.remove_clip(track_id, clip_id).map(|_| ())
            }
            SyncOp::UpdateClip {
                track_id,
                clip_id,
                patch,
            } => self.update_clip(track_id, clip_id, patch),
            SyncOp::SplitClip {
                track_id,
                clip_id,
                left,
                right,
            } => self.replace_with_split(track_id, clip_id, left.clone(), right.clone()),
            SyncOp::AddTrack { track_id, kind } => self.insert_track(track_id, *kind),
            SyncOp::UpdateTrack { track_id, patch } => self.update_track(track_id, *patch),
        }
    }

    /// Apply every op or none: the batch runs against a copy that replaces
    /// `self` only when all ops succeed.
    pub fn apply_all(&mut self, ops: &[SyncOp]) -> Result<()> {
        let mut next = self.clone();
        for op in ops {
            next.apply(op)?;
        }
        *self = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Render tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub operation: String,
    pub status: TaskStatus,
    pub percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Push-channel events
// ---------------------------------------------------------------------------

/// Server to client events. Serialized as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    Connected {
        client_id: String,
    },
    Heartbeat {},
    Pong {},
    ProjectCreated {
        project_id: String,
        timeline: Timeline,
    },
    TimelineUpdated {
        project_id: String,
        timeline: Timeline,
    },
    FileAdded {
        path: String,
        #[serde(rename = "type")]
        kind: String,
        name: String,
    },
    FileDeleted {
        path: String,
    },
    Progress {
        #[serde(rename = "type")]
        operation: String,
        percent: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    TaskUpdated {
        task: TaskRecord,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Connected { .. } => "connected",
            SyncEvent::Heartbeat {} => "heartbeat",
            SyncEvent::Pong {} => "pong",
            SyncEvent::ProjectCreated { .. } => "project_created",
            SyncEvent::TimelineUpdated { .. } => "timeline_updated",
            SyncEvent::FileAdded { .. } => "file_added",
            SyncEvent::FileDeleted { .. } => "file_deleted",
            SyncEvent::Progress { .. } => "progress",
            SyncEvent::TaskUpdated { .. } => "task_updated",
        }
    }

    /// Timeline carried by this event for `project_id`, if any.
    pub fn timeline_for(&self, project_id: &str) -> Option<&Timeline> {
        match self {
            SyncEvent::ProjectCreated {
                project_id: pid,
                timeline,
            }
            | SyncEvent::TimelineUpdated {
                project_id: pid,
                timeline,
            } if pid == project_id => Some(timeline),
            _ => None,
        }
    }
}

/// A timestamped event as it travels over the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: SyncEvent,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn now(event: SyncEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Client to server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}
