use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use reelpilot_core::sync::{TaskRecord, TaskStatus};
use reelpilot_render::ops::RenderRequest;
use serde::{Deserialize, Serialize};

use crate::error::{ok, ApiResult};
use crate::{media, AppState};

const DEFAULT_TASK_LIMIT: usize = 50;
const STATUS_TASK_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// `output` is set once the task completed, which is immediate with `?wait=true`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskRecord> for SubmitResponse {
    fn from(task: TaskRecord) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            output: task.output,
            error: task.error,
        }
    }
}

/// Service overview: where media lives, who is listening, what ran lately.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: String,
    pub media_dir: String,
    pub connected_clients: usize,
    pub active_tasks: usize,
    pub recent_tasks: Vec<TaskRecord>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(service_status))
        .route("/render", post(submit_render))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
}

async fn submit_render(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(req): Json<RenderRequest>,
) -> ApiResult<SubmitResponse> {
    let media_dir = &state.config.media_dir;
    let source = media::resolve(media_dir, &req.source)?;
    let mut operation = req.operation;
    if let Some(input) = operation.extra_input_mut() {
        let resolved = media::resolve(media_dir, input.as_str())?;
        *input = resolved.to_string_lossy().into_owned();
    }

    let task = state.renders.submit(source, operation, query.wait).await?;
    ok(task.into())
}

async fn service_status(State(state): State<AppState>) -> ApiResult<ServiceStatus> {
    let tasks = state.renders.tasks();
    ok(ServiceStatus {
        status: "active".to_string(),
        media_dir: state.config.media_dir.display().to_string(),
        connected_clients: state.hub.subscriber_count(),
        active_tasks: tasks.active_count(),
        recent_tasks: tasks.list(STATUS_TASK_LIMIT),
    })
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<TaskRecord>> {
    ok(state
        .renders
        .tasks()
        .list(query.limit.unwrap_or(DEFAULT_TASK_LIMIT)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    ok(state.renders.tasks().get(&task_id)?)
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskRecord> {
    ok(state.renders.cancel(&task_id)?)
}
