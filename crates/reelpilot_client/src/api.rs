//! Typed wrapper over the project server's REST routes.

use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use reelpilot_core::command::{CommandContext, ParsedCommand};
use reelpilot_core::sync::{SyncOp, TaskRecord, TaskStatus};
use reelpilot_core::{Clip, ClipPatch, ProjectSummary, Timeline, TrackKind, TrackPatch};
use reelpilot_render::ops::RenderRequest;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedTrack {
    pub track_id: String,
    pub timeline: Timeline,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub context: &'a CommandContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default)]
    pub command: Option<ParsedCommand>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: String,
    pub media_dir: String,
    pub connected_clients: usize,
    pub active_tasks: usize,
    pub recent_tasks: Vec<TaskRecord>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// The push channel endpoint on the same host.
    pub fn ws_url(&self) -> Result<String> {
        if let Some(rest) = self.base.strip_prefix("https://") {
            Ok(format!("wss://{rest}/ws"))
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            Ok(format!("ws://{rest}/ws"))
        } else {
            Err(ClientError::InvalidOperation(format!(
                "base url must start with http:// or https://, got {}",
                self.base
            )))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{path}", self.base))
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope = match serde_json::from_slice::<Envelope<T>>(&body) {
            Ok(envelope) => envelope,
            // Extractor rejections come back as plain text.
            Err(_) if !status.is_success() => {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).trim().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } if status.is_success() => Ok(data),
            Envelope { message, .. } => Err(ClientError::Api {
                status: status.as_u16(),
                message: message.unwrap_or_else(|| "response carried no data".to_string()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn create_or_get_project(&self, project_id: &str) -> Result<Timeline> {
        Self::send(
            self.request(Method::POST, "/projects")
                .json(&json!({ "projectId": project_id })),
        )
        .await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Timeline> {
        Self::send(self.request(Method::GET, &format!("/projects/{project_id}"))).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        Self::send(self.request(Method::GET, "/projects")).await
    }

    pub async fn add_track(&self, project_id: &str, kind: TrackKind) -> Result<AddedTrack> {
        Self::send(
            self.request(Method::POST, &format!("/projects/{project_id}/tracks"))
                .json(&json!({ "type": kind })),
        )
        .await
    }

    pub async fn update_track(
        &self,
        project_id: &str,
        track_id: &str,
        patch: &TrackPatch,
    ) -> Result<Timeline> {
        Self::send(
            self.request(
                Method::PATCH,
                &format!("/projects/{project_id}/tracks/{track_id}"),
            )
            .json(patch),
        )
        .await
    }

    pub async fn add_clip(&self, project_id: &str, track_id: &str, clip: &Clip) -> Result<Timeline> {
        Self::send(
            self.request(
                Method::POST,
                &format!("/projects/{project_id}/tracks/{track_id}/clips"),
            )
            .json(clip),
        )
        .await
    }

    pub async fn update_clip(
        &self,
        project_id: &str,
        track_id: &str,
        clip_id: &str,
        patch: &ClipPatch,
    ) -> Result<Timeline> {
        Self::send(
            self.request(
                Method::PATCH,
                &format!("/projects/{project_id}/tracks/{track_id}/clips/{clip_id}"),
            )
            .json(patch),
        )
        .await
    }

    pub async fn remove_clip(&self, project_id: &str, track_id: &str, clip_id: &str) -> Result<Timeline> {
        Self::send(self.request(
            Method::DELETE,
            &format!("/projects/{project_id}/tracks/{track_id}/clips/{clip_id}"),
        ))
        .await
    }

    /// Apply a batch of ops as one all-or-nothing mutation.
    pub async fn apply_ops(&self, project_id: &str, ops: &[SyncOp]) -> Result<Timeline> {
        Self::send(
            self.request(Method::POST, "/timeline/apply")
                .json(&json!({ "projectId": project_id, "ops": ops })),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Render tasks
    // -----------------------------------------------------------------------

    pub async fn submit_render(&self, request: &RenderRequest, wait: bool) -> Result<SubmitResponse> {
        Self::send(
            self.request(Method::POST, "/render")
                .query(&[("wait", wait)])
                .json(request),
        )
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        Self::send(self.request(Method::GET, &format!("/tasks/{task_id}"))).await
    }

    pub async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        Self::send(self.request(Method::GET, "/tasks").query(&[("limit", limit)])).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskRecord> {
        Self::send(self.request(Method::POST, &format!("/tasks/{task_id}/cancel"))).await
    }

    pub async fn service_status(&self) -> Result<ServiceStatus> {
        Self::send(self.request(Method::GET, "/status")).await
    }

    // -----------------------------------------------------------------------
    // Chat and media
    // -----------------------------------------------------------------------

    pub async fn chat(&self, message: &str, context: &CommandContext) -> Result<ChatReply> {
        Self::send(
            self.request(Method::POST, "/chat")
                .json(&ChatRequest { message, context }),
        )
        .await
    }

    pub async fn delete_media(&self, path: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Deleted {
            path: String,
        }
        let deleted: Deleted =
            Self::send(self.request(Method::DELETE, &format!("/media/{path}"))).await?;
        Ok(deleted.path)
    }
}
