//! Chat collaborator: deterministic command parsing plus a conversational reply.

use crate::config::LlmConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelpilot_core::command::{parse_command, CommandAction, CommandContext, ParsedCommand};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const UNPARSED_COMMAND_HINT: &str =
    "I couldn't understand that command. Try something like 'cut at 5 seconds' or 'crop to square'.";

const SYSTEM_PROMPT: &str = "You are an AI assistant for a video editing application. You help users understand what's happening in the editing process, provide status updates, and assist with video editing tasks. Be conversational, helpful, and concise.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(flatten)]
    pub editor: CommandContext,
    /// Most recent task messages, oldest first.
    #[serde(default)]
    pub recent_jobs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: ChatContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ParsedCommand>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, message: &str, context: &ChatContext) -> anyhow::Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP assistant
// ---------------------------------------------------------------------------

pub struct HttpAssistant {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Deserialize)]
struct CompletionContent {
    content: Option<String>,
}

impl HttpAssistant {
    pub fn new(api_key: String, base_url: String, model: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn reply(&self, message: &str, context: &ChatContext) -> anyhow::Result<String> {
        let context_json = serde_json::to_string(context)?;
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![
                CompletionMessage {
                    role: "system",
                    content: format!("{SYSTEM_PROMPT} Recent context: {context_json}"),
                },
                CompletionMessage {
                    role: "user",
                    content: message.to_string(),
                },
            ],
            temperature: 0.7,
            max_tokens: 300,
        };

        let response: CompletionResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("completion returned no content"))
    }
}

// ---------------------------------------------------------------------------
// Canned replies
// ---------------------------------------------------------------------------

/// Keyword-matched replies used when no model is configured or it fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct CannedAssistant;

impl CannedAssistant {
    pub fn respond(&self, message: &str, context: &ChatContext) -> String {
        let lower = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["classify", "sfx"]) {
            "I'm analyzing your audio files and organizing them into SFX, Music, and Ambience folders based on their content. This helps keep your media library organized!".to_string()
        } else if has(&["caption", "transcribe"]) {
            "I'm transcribing your video using Whisper AI. This will generate accurate captions with timestamps that you can use in your edit.".to_string()
        } else if has(&["rough", "cut", "scene"]) {
            "I'm analyzing your video to detect scene changes and create a rough cut timeline. This will help you get started with your edit faster!".to_string()
        } else if has(&["status", "what"]) {
            match context.recent_jobs.last() {
                Some(last) => format!("Currently working on: {last}"),
                None => "System is ready. I can help you classify audio, generate captions, or build rough cuts!".to_string(),
            }
        } else if has(&["hello", "hi"]) {
            "Hello! I'm your AI video editing assistant. I can help you organize audio files, generate captions, detect scenes, and create rough cuts. What would you like to do?".to_string()
        } else {
            "I'm here to help with your video editing tasks! I can classify audio files, generate captions, detect scenes, and create rough cuts. What would you like me to do?".to_string()
        }
    }
}

#[async_trait]
impl Assistant for CannedAssistant {
    async fn reply(&self, message: &str, context: &ChatContext) -> anyhow::Result<String> {
        Ok(self.respond(message, context))
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ChatService {
    model: Option<Arc<dyn Assistant>>,
    fallback: CannedAssistant,
}

impl ChatService {
    pub fn new(model: Option<Arc<dyn Assistant>>) -> Self {
        Self {
            model,
            fallback: CannedAssistant,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        let model = config.api_key.clone().and_then(|key| {
            match HttpAssistant::new(key, config.base_url.clone(), config.model.clone()) {
                Ok(assistant) => Some(Arc::new(assistant) as Arc<dyn Assistant>),
                Err(e) => {
                    tracing::warn!("chat model disabled: {e}");
                    None
                }
            }
        });
        if model.is_none() {
            tracing::info!("no LLM API key configured, chat uses canned replies");
        }
        Self::new(model)
    }

    /// Parse a structured command if possible, otherwise ask the assistant.
    pub async fn handle(&self, request: &ChatRequest) -> ChatReply {
        if let Some(command) = parse_command(&request.message, &request.context.editor) {
            return ChatReply {
                message: acknowledge(&command),
                command: Some(command),
                timestamp: Utc::now(),
            };
        }

        let message = match &self.model {
            Some(model) => match model.reply(&request.message, &request.context).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("chat model unavailable, using canned reply: {e}");
                    self.fallback.respond(&request.message, &request.context)
                }
            },
            None => self.fallback.respond(&request.message, &request.context),
        };

        ChatReply {
            message,
            command: None,
            timestamp: Utc::now(),
        }
    }
}

fn acknowledge(command: &ParsedCommand) -> String {
    let target = command
        .file
        .as_deref()
        .map(|f| format!(" {f}"))
        .unwrap_or_default();
    match &command.action {
        CommandAction::Cut { timestamp } => format!("Cutting{target} at {timestamp}s."),
        CommandAction::Crop {
            aspect_ratio: Some(ratio),
            ..
        } => format!("Cropping{target} to {ratio}."),
        CommandAction::Crop { width, height, .. } => format!(
            "Cropping{target} to {}x{}.",
            width.unwrap_or_default(),
            height.unwrap_or_default()
        ),
        CommandAction::Speed { speed } => format!("Changing the speed of{target} to {speed}x."),
        CommandAction::Pip {
            overlay_file,
            timestamp,
        } => format!("Adding {overlay_file} as picture-in-picture at {timestamp}s."),
        CommandAction::Text { text, .. } => format!("Adding the text \"{text}\"."),
        CommandAction::Reverse => format!("Reversing{target}."),
        CommandAction::Rotate { angle } => format!("Rotating{target} by {angle} degrees."),
        CommandAction::Delete => "Deleting the selected clip.".to_string(),
        CommandAction::Trim { start, end } => format!("Trimming{target} to {start}s-{end}s."),
    }
}
