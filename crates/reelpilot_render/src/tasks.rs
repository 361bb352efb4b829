//! In-memory render task registry with a guarded status state machine.

use crate::error::{RenderError, Result};
use chrono::{Duration, Utc};
use reelpilot_core::sync::{TaskRecord, TaskStatus};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

fn allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Submitted, Processing)
            | (Submitted, Failed)
            | (Submitted, Cancelled)
            | (Processing, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled)
    )
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskRecord>> {
        // A poisoned map is still structurally valid.
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, operation: &str) -> TaskRecord {
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            status: TaskStatus::Submitted,
            percent: 0.0,
            message: Some(format!("{operation} queued")),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().insert(record.id.clone(), record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Result<TaskRecord> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RenderError::TaskNotFound(id.to_string()))
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self.lock().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        tasks
    }

    fn transition(
        &self,
        id: &str,
        to: TaskStatus,
        update: impl FnOnce(&mut TaskRecord),
    ) -> Result<TaskRecord> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| RenderError::TaskNotFound(id.to_string()))?;
        if !allowed(task.status, to) {
            return Err(RenderError::transition(id, task.status, to));
        }
        task.status = to;
        update(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    pub fn start(&self, id: &str) -> Result<TaskRecord> {
        self.transition(id, TaskStatus::Processing, |task| {
            task.message = Some(format!("{} running", task.operation));
        })
    }

    /// Percent is clamped to `[0, 100]` and never decreases.
    pub fn progress(&self, id: &str, percent: f64) -> Result<TaskRecord> {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.transition(id, TaskStatus::Processing, |task| {
            task.percent = task.percent.max(percent);
        })
    }

    pub fn complete(&self, id: &str, output: &str) -> Result<TaskRecord> {
        self.transition(id, TaskStatus::Completed, |task| {
            task.percent = 100.0;
            task.output = Some(output.to_string());
            task.message = Some(format!("{} completed", task.operation));
        })
    }

    pub fn fail(&self, id: &str, error: &str) -> Result<TaskRecord> {
        self.transition(id, TaskStatus::Failed, |task| {
            task.error = Some(error.to_string());
            task.message = Some(format!("{} failed", task.operation));
        })
    }

    pub fn cancel(&self, id: &str) -> Result<TaskRecord> {
        self.transition(id, TaskStatus::Cancelled, |task| {
            task.message = Some(format!("{} cancelled", task.operation));
        })
    }

    /// Drop terminal tasks last updated before `max_age` ago. Returns how many went.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.updated_at < cutoff));
        before - tasks.len()
    }

    /// Tasks that are still submitted or processing.
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|t| !t.status.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
