use crate::error::{CoreError, Result};
use crate::types::*;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MAX_PROJECT_ID_LEN: usize = 64;

impl Timeline {
    /// A fresh timeline with the default `video-1`, `audio-1`, `text-1` tracks.
    pub fn new(id: impl Into<String>) -> Self {
        let mut timeline = Self::empty(id);
        timeline.tracks = vec![
            Track::new("video-1", TrackKind::Video),
            Track::new("audio-1", TrackKind::Audio),
            Track::new("text-1", TrackKind::Text),
        ];
        timeline
    }

    pub fn empty(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tracks: vec![],
            duration: 0.0,
            fps: DEFAULT_FPS,
            created: now,
            modified: now,
        }
    }

    /// Bump the `modified` timestamp.
    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }

    /// Save as pretty-printed JSON, replacing any existing file atomically.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path.as_ref(), self)
    }

    /// Load a timeline from a JSON file. `duration` is recomputed so a
    /// hand-edited file cannot carry a stale value.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let mut timeline: Timeline = serde_json::from_str(&data)?;
        timeline.refresh_duration();
        Ok(timeline)
    }
}

/// Serialize `value` to `<path>.tmp` and rename it over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// `projects/p1.json` -> `projects/p1.json.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Project ids double as file names, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_project_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_PROJECT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidOperation(format!(
            "invalid project id {:?}: expected 1-{} characters of [A-Za-z0-9_-]",
            id, MAX_PROJECT_ID_LEN
        )))
    }
}
