use anyhow::Context;
use reelpilot_render::queue::FfmpegEngine;
use reelpilot_render::render::binary_available;
use reelpilot_server::chat::ChatService;
use reelpilot_server::config::ServerConfig;
use reelpilot_server::{app, spawn_maintenance, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    for (bin, purpose) in [
        (&config.ffmpeg_path, "rendering"),
        (&config.ffprobe_path, "media probing"),
    ] {
        if !binary_available(bin).await {
            tracing::warn!("{bin} not found; {purpose} will fail until it is installed");
        }
    }

    tokio::fs::create_dir_all(&config.projects_dir)
        .await
        .with_context(|| format!("creating {}", config.projects_dir.display()))?;
    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| format!("creating {}", config.media_dir.display()))?;

    let addr = config.bind_addr()?;
    let engine = Arc::new(FfmpegEngine {
        ffmpeg: config.ffmpeg_path.clone(),
        ffprobe: config.ffprobe_path.clone(),
    });
    let chat = ChatService::from_config(&config.llm);
    let state = AppState::new(config, engine, chat);
    let _maintenance = spawn_maintenance(&state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("reelpilot server listening on http://{addr}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
