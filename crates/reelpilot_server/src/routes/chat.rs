use axum::{extract::State, routing::post, Json, Router};
use reelpilot_core::command::{parse_command, ParsedCommand};

use crate::chat::{ChatReply, ChatRequest, UNPARSED_COMMAND_HINT};
use crate::error::{ok, ApiError, ApiResult};
use crate::AppState;

const RECENT_JOBS: usize = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/commands/parse", post(parse))
}

async fn chat(State(state): State<AppState>, Json(mut req): Json<ChatRequest>) -> ApiResult<ChatReply> {
    if req.context.recent_jobs.is_empty() {
        // Task list is newest first; the assistant wants oldest first.
        req.context.recent_jobs = state
            .renders
            .tasks()
            .list(RECENT_JOBS)
            .into_iter()
            .rev()
            .filter_map(|t| t.message)
            .collect();
    }
    ok(state.chat.handle(&req).await)
}

async fn parse(Json(req): Json<ChatRequest>) -> ApiResult<ParsedCommand> {
    match parse_command(&req.message, &req.context.editor) {
        Some(command) => ok(command),
        None => Err(ApiError::BadRequest(UNPARSED_COMMAND_HINT.to_string())),
    }
}
