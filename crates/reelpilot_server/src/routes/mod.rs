use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub mod chat;
pub mod media;
pub mod render;
pub mod timeline;
pub mod ws;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(timeline::router())
        .merge(render::router())
        .merge(chat::router())
        .merge(media::router())
        .merge(ws::router())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
