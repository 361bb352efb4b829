use reelpilot_core::sync::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to execute ffprobe: {0}")]
    FfprobeExec(String),

    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("ffmpeg not found")]
    FfmpegNotFound,

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("render cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    pub(crate) fn transition(id: &str, from: TaskStatus, to: TaskStatus) -> Self {
        RenderError::InvalidTransition {
            id: id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
