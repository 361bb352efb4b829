use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use reelpilot_core::sync::SyncEvent;
use reelpilot_core::Timeline;
use reelpilot_render::ops::SourceInfo;
use reelpilot_render::queue::RenderEngine;
use reelpilot_render::render::RenderProgress;
use reelpilot_server::chat::ChatService;
use reelpilot_server::config::ServerConfig;
use reelpilot_server::{app, AppState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct InstantEngine;

#[async_trait]
impl RenderEngine for InstantEngine {
    async fn probe(&self, _source: &Path) -> reelpilot_render::Result<SourceInfo> {
        Ok(SourceInfo {
            duration: Some(8.0),
            width: Some(1280),
            height: Some(720),
            has_audio: true,
        })
    }

    async fn run(
        &self,
        _args: Vec<String>,
        _total_secs: f64,
        progress: watch::Sender<RenderProgress>,
        _cancel: CancellationToken,
    ) -> reelpilot_render::Result<()> {
        let _ = progress.send(RenderProgress {
            percent: 100.0,
            ..Default::default()
        });
        Ok(())
    }
}

struct TestServer {
    state: AppState,
    router: Router,
    dir: TempDir,
}

fn server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        projects_dir: dir.path().join("projects"),
        media_dir: dir.path().join("media"),
        ..Default::default()
    };
    let state = AppState::new(config, Arc::new(InstantEngine), ChatService::new(None));
    let router = app(state.clone());
    TestServer { state, router, dir }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn video_clip(id: &str, start: f64, end: f64) -> Value {
    json!({"id": id, "start": start, "end": end, "type": "video", "source": "intro.mp4"})
}

#[tokio::test]
async fn create_or_get_is_idempotent() {
    let s = server();
    let (status, first) = send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["tracks"].as_array().unwrap().len(), 3);

    let (status, _) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-1/clips",
        Some(video_clip("c1", 0.0, 10.0)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, second) = send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    assert_eq!(second["data"]["id"], first["data"]["id"]);
    assert_eq!(second["data"]["created"], first["data"]["created"]);
    assert_eq!(second["data"]["tracks"][0]["clips"][0]["id"], "c1");
}

#[tokio::test]
async fn broadcast_matches_subsequent_get() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    let mut rx = s.state.hub.subscribe();

    let (_, added) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-1/clips",
        Some(video_clip("c1", 0.0, 10.0)),
    )
    .await;
    assert_eq!(added["data"]["duration"], 10.0);

    let broadcast = rx.recv().await.unwrap();
    let (_, fetched) = send(&s.router, Method::GET, "/projects/p1", None).await;
    let fetched: Timeline = serde_json::from_value(fetched["data"].clone()).unwrap();
    assert_eq!(broadcast.event.timeline_for("p1"), Some(&fetched));
}

#[tokio::test]
async fn clip_lifecycle_recomputes_duration() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-1/clips",
        Some(video_clip("c1", 0.0, 10.0)),
    )
    .await;

    let (_, with_audio) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/audio-1/clips",
        Some(json!({"id": "c2", "start": 5.0, "end": 15.0, "type": "audio", "source": "vo.wav"})),
    )
    .await;
    assert_eq!(with_audio["data"]["duration"], 15.0);

    let (_, patched) = send(
        &s.router,
        Method::PATCH,
        "/projects/p1/tracks/video-1/clips/c1",
        Some(json!({"start": 2.0, "end": 6.0})),
    )
    .await;
    assert_eq!(patched["data"]["tracks"][0]["clips"][0]["start"], 2.0);

    let (status, removed) = send(
        &s.router,
        Method::DELETE,
        "/projects/p1/tracks/audio-1/clips/c2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["data"]["duration"], 6.0);
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let s = server();
    let (status, body) = send(&s.router, Method::GET, "/projects/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("ghost"));

    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    let (status, _) = send(&s.router, Method::DELETE, "/projects/p1/tracks/video-1/clips/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-9/clips",
        Some(video_clip("c1", 0.0, 1.0)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_project_id_is_400() {
    let s = server();
    let (status, body) = send(
        &s.router,
        Method::POST,
        "/projects",
        Some(json!({"projectId": "bad id!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(!s.dir.path().join("projects").join("bad id!.json").exists());
}

#[tokio::test]
async fn invalid_bounds_are_400() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    let (status, _) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-1/clips",
        Some(video_clip("c1", 5.0, 5.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn locked_track_is_409() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    let (status, locked) = send(
        &s.router,
        Method::PATCH,
        "/projects/p1/tracks/video-1",
        Some(json!({"locked": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(locked["data"]["tracks"][0]["locked"], true);

    let (status, body) = send(
        &s.router,
        Method::POST,
        "/projects/p1/tracks/video-1/clips",
        Some(video_clip("c1", 0.0, 1.0)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn add_track_picks_next_free_id() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;
    let (_, body) = send(&s.router, Method::POST, "/projects/p1/tracks", Some(json!({"type": "audio"}))).await;
    assert_eq!(body["data"]["trackId"], "audio-2");
    assert_eq!(body["data"]["timeline"]["tracks"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn apply_ops_is_all_or_nothing() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "p1"}))).await;

    let (status, _) = send(
        &s.router,
        Method::POST,
        "/timeline/apply",
        Some(json!({
            "projectId": "p1",
            "ops": [
                {"op": "add_clip", "trackId": "video-1", "clip": video_clip("c1", 0.0, 4.0)},
                {"op": "remove_clip", "trackId": "video-1", "clipId": "missing"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, fetched) = send(&s.router, Method::GET, "/projects/p1", None).await;
    assert_eq!(fetched["data"]["duration"], 0.0);

    let (status, applied) = send(
        &s.router,
        Method::POST,
        "/timeline/apply",
        Some(json!({
            "projectId": "p1",
            "ops": [
                {"op": "add_clip", "trackId": "video-1", "clip": video_clip("c1", 0.0, 4.0)},
                {"op": "update_track", "trackId": "audio-1", "patch": {"muted": true}}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied["data"]["duration"], 4.0);
    assert_eq!(applied["data"]["tracks"][1]["muted"], true);
}

#[tokio::test]
async fn list_projects_returns_summaries() {
    let s = server();
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "beta"}))).await;
    send(&s.router, Method::POST, "/projects", Some(json!({"projectId": "alpha"}))).await;

    let (_, body) = send(&s.router, Method::GET, "/projects", None).await;
    let list = body["data"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], "alpha");
    assert_eq!(list[0]["trackCount"], 3);
    assert_eq!(list[0]["clipCount"], 0);
}

#[tokio::test]
async fn render_wait_returns_output_and_task_is_pollable() {
    let s = server();
    let mut rx = s.state.hub.subscribe();
    let (status, body) = send(
        &s.router,
        Method::POST,
        "/render?wait=true",
        Some(json!({"source": "clips/intro.mp4", "operation": "speed", "speed": 2.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    let output = body["data"]["output"].as_str().unwrap().to_string();
    assert!(output.contains("intro_speed_"));

    let task_id = body["data"]["taskId"].as_str().unwrap();
    let (_, task) = send(&s.router, Method::GET, &format!("/tasks/{task_id}"), None).await;
    assert_eq!(task["data"]["percent"], 100.0);

    let mut kinds = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        kinds.push(envelope.event.kind());
    }
    assert!(kinds.contains(&"task_updated"));
    assert!(kinds.contains(&"file_added"));

    let (status, _) = send(&s.router, Method::POST, &format!("/tasks/{task_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn render_output_can_be_rendered_again() {
    let s = server();
    let mut rx = s.state.hub.subscribe();
    let (_, first) = send(
        &s.router,
        Method::POST,
        "/render?wait=true",
        Some(json!({"source": "clips/intro.mp4", "operation": "speed", "speed": 2.0})),
    )
    .await;
    let output = first["data"]["output"].as_str().unwrap().to_string();
    assert!(output.starts_with("clips/intro_speed_"), "{output}");

    let mut added = None;
    while let Ok(envelope) = rx.try_recv() {
        if let SyncEvent::FileAdded { path, .. } = envelope.event {
            added = Some(path);
        }
    }
    assert_eq!(added.as_deref(), Some(output.as_str()));

    let (status, second) = send(
        &s.router,
        Method::POST,
        "/render?wait=true",
        Some(json!({"source": output, "operation": "reverse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{second}");
    assert_eq!(second["data"]["status"], "completed");
    assert!(second["data"]["output"]
        .as_str()
        .unwrap()
        .starts_with("clips/intro_speed_"));
}

#[tokio::test]
async fn audio_renders_resolve_the_second_input() {
    let s = server();
    let (status, body) = send(
        &s.router,
        Method::POST,
        "/render?wait=true",
        Some(json!({"source": "intro.mp4", "operation": "add_audio", "audio": "music/bed.mp3", "volume": 0.4})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["output"].as_str().unwrap().starts_with("intro_add_audio_"));

    let (status, _) = send(
        &s.router,
        Method::POST,
        "/render",
        Some(json!({"source": "intro.mp4", "operation": "replace_audio", "audio": "../voice.wav"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_lists_recent_tasks() {
    let s = server();
    for _ in 0..12 {
        send(
            &s.router,
            Method::POST,
            "/render?wait=true",
            Some(json!({"source": "intro.mp4", "operation": "duplicate"})),
        )
        .await;
    }
    let _listener = s.state.hub.subscribe();

    let (status, body) = send(&s.router, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["connectedClients"], 1);
    assert_eq!(body["data"]["activeTasks"], 0);
    let recent = body["data"]["recentTasks"].as_array().unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0]["operation"], "duplicate");
    assert!(body["data"]["mediaDir"].as_str().unwrap().ends_with("media"));
}

#[tokio::test]
async fn render_rejects_bad_input() {
    let s = server();
    let (status, _) = send(
        &s.router,
        Method::POST,
        "/render",
        Some(json!({"source": "../outside.mp4", "operation": "reverse"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &s.router,
        Method::POST,
        "/render",
        Some(json!({"source": "a.mp4", "operation": "rotate", "angle": 45})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&s.router, Method::GET, "/tasks/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_returns_structured_command() {
    let s = server();
    let (status, body) = send(
        &s.router,
        Method::POST,
        "/chat",
        Some(json!({"message": "rotate the clip 90 degrees", "context": {"selectedFile": "intro.mp4"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["command"]["action"], "rotate");
    assert_eq!(body["data"]["command"]["parameters"]["angle"], 90);
    assert_eq!(body["data"]["command"]["file"], "intro.mp4");

    let (_, canned) = send(&s.router, Method::POST, "/chat", Some(json!({"message": "hello"}))).await;
    assert!(canned["data"]["command"].is_null());
    assert!(canned["data"]["message"].as_str().unwrap().starts_with("Hello!"));

    let (status, body) = send(
        &s.router,
        Method::POST,
        "/commands/parse",
        Some(json!({"message": "make it pop"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("cut at 5 seconds"));
}

#[tokio::test]
async fn delete_media_emits_file_deleted() {
    let s = server();
    let clips = s.dir.path().join("media").join("clips");
    std::fs::create_dir_all(&clips).unwrap();
    std::fs::write(clips.join("old.mp4"), b"x").unwrap();
    let mut rx = s.state.hub.subscribe();

    let (status, body) = send(&s.router, Method::DELETE, "/media/clips/old.mp4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["path"], "clips/old.mp4");
    assert!(!clips.join("old.mp4").exists());
    assert_eq!(
        rx.recv().await.unwrap().event,
        SyncEvent::FileDeleted {
            path: "clips/old.mp4".into()
        }
    );

    let (status, _) = send(&s.router, Method::DELETE, "/media/clips/old.mp4", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_is_ok() {
    let s = server();
    let (status, body) = send(&s.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
