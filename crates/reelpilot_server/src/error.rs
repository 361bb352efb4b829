use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reelpilot_core::CoreError;
use reelpilot_render::RenderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope for every JSON response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid project id: {0}")]
    InvalidProjectId(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) => match err {
                CoreError::ProjectNotFound(_)
                | CoreError::TrackNotFound(_)
                | CoreError::ClipNotFound(_) => StatusCode::NOT_FOUND,
                CoreError::TrackLocked(_) => StatusCode::CONFLICT,
                CoreError::InvalidOperation(_)
                | CoreError::IncompatibleTrack { .. }
                | CoreError::DuplicateClip(_) => StatusCode::BAD_REQUEST,
                CoreError::Io(_) | CoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Render(err) => match err {
                RenderError::TaskNotFound(_) | RenderError::FileNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                RenderError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
                RenderError::InvalidTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidProjectId(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
            _ => self.to_string(),
        };
        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}
