use axum::{
    extract::{Path, State},
    routing::delete,
    Router,
};
use reelpilot_core::sync::SyncEvent;
use serde::Serialize;

use crate::error::{ok, ApiError, ApiResult};
use crate::{media, AppState};

#[derive(Debug, Serialize)]
pub struct DeletedFile {
    pub path: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/media/{*path}", delete(delete_media))
}

async fn delete_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<DeletedFile> {
    let full = media::resolve(&state.config.media_dir, &path)?;
    match tokio::fs::remove_file(&full).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("media file not found: {path}")));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(path = %path, "media file deleted");
    state.hub.publish(SyncEvent::FileDeleted { path: path.clone() });
    ok(DeletedFile { path })
}
