//! Single entry point for editor intents.
//!
//! Timeline edits are applied to the local store and handed to the sync
//! worker. Asset-producing operations become render tasks on the server; the
//! dispatcher never inserts their output, that is left to the caller once
//! [`Dispatcher::watch_task`] resolves.

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::sync::SyncHandle;
use crate::{lock, SharedStore};
use reelpilot_core::command::{CommandAction, CommandContext, ParsedCommand};
use reelpilot_core::store::{Mutation, TimelineStore};
use reelpilot_core::sync::{SyncEvent, TaskRecord, TaskStatus};
use reelpilot_core::{format_timecode, Clip, ClipContent, CoreError, TextStyle, TrackKind};
use reelpilot_render::ops::{AspectRatio, EditOperation, RenderRequest};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

/// Length of a text clip added without an explicit duration.
pub const DEFAULT_TEXT_DURATION: f64 = 3.0;

// Picture-in-picture from chat lands top-left at a fixed thumbnail size.
const PIP_INSET: i32 = 10;
const PIP_SIZE: (u32, u32) = (320, 180);

#[derive(Debug, Clone, PartialEq)]
pub enum EditIntent {
    /// Split the selected clip.
    Split { time: f64 },
    /// Remove the selected clip.
    Delete,
    AddText {
        text: String,
        at: f64,
        duration: f64,
        style: TextStyle,
    },
    Move {
        clip_id: String,
        to_track: String,
        start: f64,
        end: f64,
    },
    /// New bounds for the selected clip.
    Resize { start: f64, end: f64 },
    ToggleMute { track_id: String },
    ToggleHidden { track_id: String },
    /// Speed, crop, rotate, volume, trim, fade, pip, reverse, opacity and the
    /// other asset-producing operations, applied to the selected clip's source.
    Render(EditOperation),
}

impl EditIntent {
    pub fn name(&self) -> &'static str {
        match self {
            EditIntent::Split { .. } => "split",
            EditIntent::Delete => "delete",
            EditIntent::AddText { .. } => "add_text",
            EditIntent::Move { .. } => "move",
            EditIntent::Resize { .. } => "resize",
            EditIntent::ToggleMute { .. } => "toggle_mute",
            EditIntent::ToggleHidden { .. } => "toggle_hidden",
            EditIntent::Render(op) => op.name(),
        }
    }

    pub fn is_render(&self) -> bool {
        matches!(self, EditIntent::Render(_))
    }

    /// Translate a parsed chat command. `playhead` places text without a timestamp.
    pub fn from_command(command: &ParsedCommand, playhead: f64) -> Result<Self> {
        let intent = match &command.action {
            CommandAction::Cut { timestamp } => EditIntent::Split { time: *timestamp },
            CommandAction::Delete => EditIntent::Delete,
            CommandAction::Text { text, timestamp } => EditIntent::AddText {
                text: text.clone(),
                at: timestamp.unwrap_or(playhead),
                duration: DEFAULT_TEXT_DURATION,
                style: TextStyle::default(),
            },
            CommandAction::Crop {
                aspect_ratio,
                width,
                height,
            } => {
                let aspect_ratio = match aspect_ratio.as_deref() {
                    Some(ratio) => Some(AspectRatio::parse(ratio).ok_or_else(|| {
                        ClientError::InvalidOperation(format!("unsupported aspect ratio {ratio}"))
                    })?),
                    None => None,
                };
                EditIntent::Render(EditOperation::Crop {
                    x: 0,
                    y: 0,
                    width: *width,
                    height: *height,
                    aspect_ratio,
                })
            }
            CommandAction::Speed { speed } => EditIntent::Render(EditOperation::Speed { speed: *speed }),
            CommandAction::Pip { overlay_file, .. } => EditIntent::Render(EditOperation::Pip {
                overlay: overlay_file.clone(),
                x: PIP_INSET,
                y: PIP_INSET,
                width: Some(PIP_SIZE.0),
                height: Some(PIP_SIZE.1),
            }),
            CommandAction::Reverse => EditIntent::Render(EditOperation::Reverse),
            CommandAction::Rotate { angle } => EditIntent::Render(EditOperation::Rotate { angle: *angle }),
            CommandAction::Trim { start, end } => EditIntent::Render(EditOperation::Trim {
                start: *start,
                end: *end,
            }),
        };
        Ok(intent)
    }
}

/// A render task accepted by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTicket {
    pub task_id: String,
    pub operation: String,
    pub source: String,
    pub status: TaskStatus,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Edited(Mutation),
    Submitted(RenderTicket),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskRecord),
    Failed(TaskRecord),
    Cancelled(TaskRecord),
    /// Still running after the polling budget. The server keeps working on it.
    TakingLonger(TaskRecord),
}

impl TaskOutcome {
    fn terminal(task: &TaskRecord) -> Option<Self> {
        match task.status {
            TaskStatus::Completed => Some(TaskOutcome::Completed(task.clone())),
            TaskStatus::Failed => Some(TaskOutcome::Failed(task.clone())),
            TaskStatus::Cancelled => Some(TaskOutcome::Cancelled(task.clone())),
            TaskStatus::Submitted | TaskStatus::Processing => None,
        }
    }

    pub fn task(&self) -> &TaskRecord {
        match self {
            TaskOutcome::Completed(t)
            | TaskOutcome::Failed(t)
            | TaskOutcome::Cancelled(t)
            | TaskOutcome::TakingLonger(t) => t,
        }
    }
}

/// What one chat exchange produced. Failures are folded into `message`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub message: String,
    pub command: Option<ParsedCommand>,
    pub dispatched: Option<Dispatched>,
}

pub struct Dispatcher {
    api: ApiClient,
    store: SharedStore,
    sync: SyncHandle,
    events: Option<broadcast::Sender<SyncEvent>>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl Dispatcher {
    pub fn new(api: ApiClient, store: SharedStore, sync: SyncHandle, config: &ClientConfig) -> Self {
        Self {
            api,
            store,
            sync,
            events: None,
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
        }
    }

    /// Let task watchers resolve from pushed `task_updated` events.
    pub fn with_events(mut self, events: broadcast::Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn dispatch(&self, intent: EditIntent) -> Result<Dispatched> {
        match intent {
            EditIntent::Render(op) => {
                let source = self.selected_source()?;
                self.render(&source, op).await.map(Dispatched::Submitted)
            }
            edit => self.edit(&edit).map(Dispatched::Edited),
        }
    }

    /// Like [`dispatch`](Self::dispatch), but a file named in the command wins
    /// over the selection as render source.
    pub async fn dispatch_command(&self, command: &ParsedCommand) -> Result<Dispatched> {
        let intent = EditIntent::from_command(command, lock(&self.store).playhead())?;
        match (intent, &command.file) {
            (EditIntent::Render(op), Some(file)) => {
                self.render(file, op).await.map(Dispatched::Submitted)
            }
            (intent, _) => self.dispatch(intent).await,
        }
    }

    /// Apply a timeline edit locally and wake the sync worker.
    pub fn edit(&self, intent: &EditIntent) -> Result<Mutation> {
        let (mutation, duration) = {
            let mut store = lock(&self.store);
            let mutation = apply_edit(&mut store, intent)?;
            (mutation, store.timeline().duration)
        };
        info!(
            intent = intent.name(),
            seq = mutation.seq,
            duration = %format_timecode(duration),
            "edit applied locally"
        );
        self.sync.kick();
        Ok(mutation)
    }

    /// Submit `op` on `source` without waiting for the render.
    pub async fn render(&self, source: &str, op: EditOperation) -> Result<RenderTicket> {
        op.validate()
            .map_err(|e| ClientError::InvalidOperation(e.to_string()))?;

        let operation = op.name().to_string();
        let request = RenderRequest {
            source: source.to_string(),
            operation: op,
        };
        let submitted = self.api.submit_render(&request, false).await?;
        info!(task_id = %submitted.task_id, operation = %operation, source, "render submitted");
        Ok(RenderTicket {
            task_id: submitted.task_id,
            operation,
            source: request.source,
            status: submitted.status,
            output: submitted.output,
        })
    }

    /// Wait for a task to finish, from pushed events when available and by
    /// polling otherwise. Gives up with [`TaskOutcome::TakingLonger`] after
    /// the configured number of polls; the task itself is left running.
    pub async fn watch_task(&self, task_id: &str) -> Result<TaskOutcome> {
        // Subscribe before the first fetch so a completion in between is seen.
        let mut events = self.events.as_ref().map(|tx| tx.subscribe());
        let mut last = self.api.get_task(task_id).await?;
        if let Some(done) = TaskOutcome::terminal(&last) {
            return Ok(done);
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;
        let mut polls = 0;
        loop {
            tokio::select! {
                pushed = next_task_update(&mut events, task_id) => {
                    if let Some(task) = pushed {
                        if let Some(done) = TaskOutcome::terminal(&task) {
                            return Ok(done);
                        }
                        last = task;
                    }
                }
                _ = ticker.tick() => {
                    polls += 1;
                    match self.api.get_task(task_id).await {
                        Ok(task) => {
                            if let Some(done) = TaskOutcome::terminal(&task) {
                                return Ok(done);
                            }
                            last = task;
                        }
                        Err(e) if e.is_retryable() => {
                            warn!(task_id, error = %e, "task poll failed");
                        }
                        Err(e) => return Err(e),
                    }
                    if polls >= self.max_poll_attempts {
                        info!(task_id, polls, "task is taking longer than expected");
                        return Ok(TaskOutcome::TakingLonger(last));
                    }
                }
            }
        }
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskRecord> {
        let task = self.api.cancel_task(task_id).await?;
        info!(task_id, "render cancelled");
        Ok(task)
    }

    /// Editor state sent along with chat messages.
    pub fn editor_context(&self) -> CommandContext {
        let store = lock(&self.store);
        CommandContext {
            selected_file: store
                .selected_clip()
                .and_then(|(_, clip)| clip.content.source())
                .map(str::to_string),
            project_id: Some(store.project_id().to_string()),
            playhead: Some(store.playhead()),
        }
    }

    /// Send a chat message and run the command it maps to, if any.
    pub async fn chat(&self, message: &str) -> ChatTurn {
        let reply = match self.api.chat(message, &self.editor_context()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "chat request failed");
                return ChatTurn {
                    message: format!("The assistant is unavailable right now: {e}"),
                    command: None,
                    dispatched: None,
                };
            }
        };

        let Some(command) = reply.command else {
            return ChatTurn {
                message: reply.message,
                command: None,
                dispatched: None,
            };
        };

        match self.dispatch_command(&command).await {
            Ok(dispatched) => ChatTurn {
                message: reply.message,
                command: Some(command),
                dispatched: Some(dispatched),
            },
            Err(e) => {
                warn!(action = command.action.name(), error = %e, "chat command failed");
                ChatTurn {
                    message: format!("{} That did not work: {e}", reply.message),
                    command: Some(command),
                    dispatched: None,
                }
            }
        }
    }

    fn selected_source(&self) -> Result<String> {
        let store = lock(&self.store);
        let (_, clip) = store
            .selected_clip()
            .ok_or_else(|| ClientError::InvalidOperation("select a clip to render first".into()))?;
        clip.content
            .source()
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidOperation(format!("clip {} has no source media", clip.id)))
    }
}

fn selected_ids(store: &TimelineStore) -> Result<(String, String)> {
    store
        .selected_clip()
        .map(|(track, clip)| (track.id.clone(), clip.id.clone()))
        .ok_or_else(|| ClientError::InvalidOperation("select a clip first".into()))
}

fn apply_edit(store: &mut TimelineStore, intent: &EditIntent) -> Result<Mutation> {
    let mutation = match intent {
        EditIntent::Split { time } => {
            selected_ids(store)?;
            store.split_selected_at(*time)?
        }
        EditIntent::Delete => {
            let (track_id, clip_id) = selected_ids(store)?;
            store.remove_clip(&track_id, &clip_id)?
        }
        EditIntent::Resize { start, end } => {
            let (track_id, clip_id) = selected_ids(store)?;
            store.resize_clip(&track_id, &clip_id, *start, *end)?
        }
        EditIntent::AddText {
            text,
            at,
            duration,
            style,
        } => {
            let track_id = store
                .timeline()
                .tracks
                .iter()
                .find(|t| t.kind == TrackKind::Text && !t.locked)
                .map(|t| t.id.clone())
                .ok_or_else(|| ClientError::InvalidOperation("no unlocked text track".into()))?;
            let mut clip = Clip::text(text_clip_id(), *at, at + duration, text.clone());
            if let ClipContent::Text { style: s, .. } = &mut clip.content {
                *s = style.clone();
            }
            store.add_clip(&track_id, clip)?
        }
        EditIntent::Move {
            clip_id,
            to_track,
            start,
            end,
        } => {
            let from = store
                .timeline()
                .find_clip(clip_id)
                .map(|(track, _)| track.id.clone())
                .ok_or_else(|| CoreError::ClipNotFound(clip_id.clone()))?;
            store.move_clip(clip_id, &from, to_track, *start, *end)?
        }
        EditIntent::ToggleMute { track_id } => store.toggle_track_mute(track_id)?,
        EditIntent::ToggleHidden { track_id } => store.toggle_track_hidden(track_id)?,
        EditIntent::Render(op) => {
            return Err(ClientError::InvalidOperation(format!(
                "{} renders a new asset and is not a timeline edit",
                op.name()
            )))
        }
    };
    Ok(mutation)
}

fn text_clip_id() -> String {
    format!("text-{}", &Uuid::new_v4().simple().to_string()[..8])
}

async fn next_task_update(
    events: &mut Option<broadcast::Receiver<SyncEvent>>,
    task_id: &str,
) -> Option<TaskRecord> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(SyncEvent::TaskUpdated { task }) if task.id == task_id => return Some(task),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => {
                *events = None;
                return None;
            }
        }
    }
}
