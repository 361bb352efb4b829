use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Clip not found: {0}")]
    ClipNotFound(String),

    #[error("Track is locked: {0}")]
    TrackLocked(String),

    #[error("Clip {clip_id} of type {clip_kind} cannot be placed on {track_kind} track")]
    IncompatibleTrack {
        clip_id: String,
        clip_kind: String,
        track_kind: String,
    },

    #[error("Duplicate clip id: {0}")]
    DuplicateClip(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CoreError {
    /// True for the id-resolution failures callers surface as NotFound.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::ProjectNotFound(_) | CoreError::TrackNotFound(_) | CoreError::ClipNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
