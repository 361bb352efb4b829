use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use reelpilot_core::sync::SyncOp;
use reelpilot_core::{Clip, ClipPatch, ProjectSummary, Timeline, TrackKind, TrackPatch};
use serde::{Deserialize, Serialize};

use crate::error::{ok, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddTrackRequest {
    #[serde(rename = "type")]
    pub kind: TrackKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTrackResponse {
    pub track_id: String,
    pub timeline: Timeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOpsRequest {
    pub project_id: String,
    pub ops: Vec<SyncOp>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{project_id}", get(get_project))
        .route("/projects/{project_id}/tracks", post(add_track))
        .route("/projects/{project_id}/tracks/{track_id}", patch(update_track))
        .route("/projects/{project_id}/tracks/{track_id}/clips", post(add_clip))
        .route(
            "/projects/{project_id}/tracks/{track_id}/clips/{clip_id}",
            patch(update_clip).delete(remove_clip),
        )
        .route("/timeline/apply", post(apply_ops))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Vec<ProjectSummary>> {
    ok(state.projects.list().await?)
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<Timeline> {
    ok(state.projects.create_or_get(&req.project_id).await?)
}

async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Timeline> {
    ok(state.projects.get(&project_id).await?)
}

async fn add_track(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<AddTrackRequest>,
) -> ApiResult<AddTrackResponse> {
    let (track_id, timeline) = state.projects.add_track(&project_id, req.kind).await?;
    ok(AddTrackResponse { track_id, timeline })
}

async fn update_track(
    State(state): State<AppState>,
    Path((project_id, track_id)): Path<(String, String)>,
    Json(patch): Json<TrackPatch>,
) -> ApiResult<Timeline> {
    ok(state.projects.update_track(&project_id, &track_id, patch).await?)
}

async fn add_clip(
    State(state): State<AppState>,
    Path((project_id, track_id)): Path<(String, String)>,
    Json(clip): Json<Clip>,
) -> ApiResult<Timeline> {
    ok(state.projects.add_clip(&project_id, &track_id, clip).await?)
}

async fn update_clip(
    State(state): State<AppState>,
    Path((project_id, track_id, clip_id)): Path<(String, String, String)>,
    Json(patch): Json<ClipPatch>,
) -> ApiResult<Timeline> {
    ok(state
        .projects
        .update_clip(&project_id, &track_id, &clip_id, &patch)
        .await?)
}

async fn remove_clip(
    State(state): State<AppState>,
    Path((project_id, track_id, clip_id)): Path<(String, String, String)>,
) -> ApiResult<Timeline> {
    ok(state.projects.remove_clip(&project_id, &track_id, &clip_id).await?)
}

async fn apply_ops(
    State(state): State<AppState>,
    Json(req): Json<ApplyOpsRequest>,
) -> ApiResult<Timeline> {
    ok(state.projects.apply_ops(&req.project_id, &req.ops).await?)
}
