pub mod chat;
pub mod config;
pub mod error;
pub mod hub;
pub mod media;
pub mod projects;
pub mod routes;

use axum::http::{HeaderValue, Method};
use axum::Router;
use chat::ChatService;
use config::ServerConfig;
use hub::SyncHub;
use projects::ProjectService;
use reelpilot_render::queue::{RenderEngine, RenderQueue};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: SyncHub,
    pub projects: Arc<ProjectService>,
    pub renders: RenderQueue,
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(config: ServerConfig, engine: Arc<dyn RenderEngine>, chat: ChatService) -> Self {
        let hub = SyncHub::default();
        let projects = Arc::new(ProjectService::new(&config.projects_dir, hub.clone()));
        let renders = RenderQueue::new(engine, Arc::new(hub.clone()), config.max_concurrent_renders)
            .with_media_root(config.media_dir.clone());
        Self {
            config: Arc::new(config),
            hub,
            projects,
            renders,
            chat: Arc::new(chat),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    routes::router(state).layer(cors)
}

/// Hourly pruning of old render tasks.
pub fn spawn_maintenance(state: &AppState) -> tokio::task::JoinHandle<()> {
    let renders = state.renders.clone();
    let retention = state.config.task_retention();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            renders.prune(retention);
        }
    })
}
