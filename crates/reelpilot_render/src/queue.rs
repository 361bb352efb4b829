//! Bounded-concurrency render queue.
//!
//! Each submitted operation becomes a task in the [`TaskRegistry`]. A spawned
//! job waits for a semaphore permit, probes the source, runs the engine and
//! reports every state change through [`RenderEvents`].

use crate::error::{RenderError, Result};
use crate::ops::{build_args, output_path, EditOperation, SourceInfo};
use crate::probe::probe_source;
use crate::render::{execute, RenderProgress};
use crate::tasks::TaskRegistry;
use async_trait::async_trait;
use reelpilot_core::sync::TaskRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// The process that actually produces derived media.
#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    async fn probe(&self, source: &Path) -> Result<SourceInfo>;

    async fn run(
        &self,
        args: Vec<String>,
        total_secs: f64,
        progress: watch::Sender<RenderProgress>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Where queue notifications go. The server forwards these to the push channel.
pub trait RenderEvents: Send + Sync + 'static {
    fn progress(&self, task_id: &str, operation: &str, percent: f64);
    fn task_updated(&self, task: &TaskRecord);
    fn file_added(&self, path: &Path);
}

#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[async_trait]
impl RenderEngine for FfmpegEngine {
    async fn probe(&self, source: &Path) -> Result<SourceInfo> {
        probe_source(&self.ffprobe, source).await
    }

    async fn run(
        &self,
        args: Vec<String>,
        total_secs: f64,
        progress: watch::Sender<RenderProgress>,
        cancel: CancellationToken,
    ) -> Result<()> {
        execute(&self.ffmpeg, &args, total_secs, progress, cancel).await
    }
}

#[derive(Clone)]
pub struct RenderQueue {
    engine: Arc<dyn RenderEngine>,
    events: Arc<dyn RenderEvents>,
    tasks: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
    media_root: Option<PathBuf>,
}

impl RenderQueue {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        events: Arc<dyn RenderEvents>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            events,
            tasks: Arc::new(TaskRegistry::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            media_root: None,
        }
    }

    /// Report outputs relative to `root`, the same form sources are given in.
    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = Some(root.into());
        self
    }

    fn reported_path(&self, output: &Path) -> PathBuf {
        match &self.media_root {
            Some(root) => output
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| output.to_path_buf()),
            None => output.to_path_buf(),
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Queue `operation` on `source`. With `wait` the call resolves once the
    /// task is terminal and returns the final record.
    pub async fn submit(
        &self,
        source: PathBuf,
        operation: EditOperation,
        wait: bool,
    ) -> Result<TaskRecord> {
        operation.validate()?;

        let record = self.tasks.create(operation.name());
        let token = CancellationToken::new();
        self.cancels_lock().insert(record.id.clone(), token.clone());
        self.events.task_updated(&record);
        tracing::info!(task_id = %record.id, operation = operation.name(), source = %source.display(), "render submitted");

        let job = tokio::spawn(self.clone().run_task(record.id.clone(), source, operation, token));

        if wait {
            if let Err(e) = job.await {
                tracing::warn!(task_id = %record.id, "render job panicked: {e}");
            }
            return self.tasks.get(&record.id);
        }
        Ok(record)
    }

    /// Cancel a submitted or processing task; a running ffmpeg is killed.
    pub fn cancel(&self, id: &str) -> Result<TaskRecord> {
        let record = self.tasks.cancel(id)?;
        self.events.task_updated(&record);
        if let Some(token) = self.cancels_lock().get(id) {
            token.cancel();
        }
        tracing::info!(task_id = %id, "render cancelled");
        Ok(record)
    }

    pub fn prune(&self, retention: chrono::Duration) -> usize {
        let pruned = self.tasks.prune_older_than(retention);
        if pruned > 0 {
            tracing::info!(pruned, "pruned old render tasks");
        }
        pruned
    }

    fn cancels_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_task(
        self,
        id: String,
        source: PathBuf,
        operation: EditOperation,
        token: CancellationToken,
    ) {
        let result = tokio::select! {
            _ = token.cancelled() => Err(RenderError::Cancelled),
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(_permit) => self.render(&id, &source, &operation, token.clone()).await,
                Err(_) => Err(RenderError::Cancelled),
            },
        };

        self.cancels_lock().remove(&id);

        let already_terminal = self
            .tasks
            .get(&id)
            .map(|t| t.status.is_terminal())
            .unwrap_or(true);

        let finished = match result {
            Ok(output) => {
                tracing::info!(task_id = %id, output = %output.display(), "render completed");
                let reported = self.reported_path(&output);
                let record = self.tasks.complete(&id, &reported.to_string_lossy());
                if record.is_ok() {
                    self.events.file_added(&reported);
                }
                record
            }
            Err(_) if already_terminal => return,
            Err(RenderError::Cancelled) => self.tasks.cancel(&id),
            Err(e) => {
                tracing::warn!(task_id = %id, "render failed: {e}");
                self.tasks.fail(&id, &e.to_string())
            }
        };

        match finished {
            Ok(record) => self.events.task_updated(&record),
            Err(e) => tracing::debug!(task_id = %id, "task finished after a concurrent change: {e}"),
        }
    }

    async fn render(
        &self,
        id: &str,
        source: &Path,
        operation: &EditOperation,
        token: CancellationToken,
    ) -> Result<PathBuf> {
        let started = self.tasks.start(id)?;
        self.events.task_updated(&started);

        let info = match self.engine.probe(source).await {
            Ok(info) => info,
            Err(e @ RenderError::FileNotFound(_)) => return Err(e),
            Err(e) if operation.needs_probe() => return Err(e),
            Err(e) => {
                tracing::debug!(task_id = %id, "probe failed, continuing without source info: {e}");
                SourceInfo {
                    has_audio: true,
                    ..SourceInfo::default()
                }
            }
        };

        let output = output_path(source, operation.name(), id);
        let args = build_args(source, operation, &output, &info)?;
        let total_secs = operation.expected_duration(&info).unwrap_or(0.0);

        let (tx, mut rx) = watch::channel(RenderProgress::default());
        let forward = {
            let tasks = self.tasks.clone();
            let events = self.events.clone();
            let id = id.to_string();
            let name = operation.name();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let percent = rx.borrow().percent;
                    if let Ok(record) = tasks.progress(&id, percent) {
                        events.progress(&id, name, record.percent);
                    }
                }
            })
        };

        let result = self.engine.run(args, total_secs, tx, token).await;
        let _ = forward.await;
        result.map(|()| output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelpilot_core::sync::TaskStatus;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Block,
    }

    struct FakeEngine {
        behaviour: Behaviour,
        runs: Mutex<Vec<Vec<String>>>,
    }

    impl FakeEngine {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                runs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RenderEngine for FakeEngine {
        async fn probe(&self, _source: &Path) -> Result<SourceInfo> {
            Ok(SourceInfo {
                duration: Some(10.0),
                width: Some(1920),
                height: Some(1080),
                has_audio: true,
            })
        }

        async fn run(
            &self,
            args: Vec<String>,
            _total_secs: f64,
            progress: watch::Sender<RenderProgress>,
            cancel: CancellationToken,
        ) -> Result<()> {
            self.runs.lock().unwrap().push(args);
            match self.behaviour {
                Behaviour::Succeed => {
                    for percent in [25.0, 50.0, 100.0] {
                        let _ = progress.send(RenderProgress {
                            percent,
                            ..Default::default()
                        });
                        tokio::task::yield_now().await;
                    }
                    Ok(())
                }
                Behaviour::Fail => Err(RenderError::FfmpegFailed("boom".into())),
                Behaviour::Block => {
                    cancel.cancelled().await;
                    Err(RenderError::Cancelled)
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        log: Mutex<Vec<String>>,
    }

    impl RecordingEvents {
        fn kinds(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl RenderEvents for RecordingEvents {
        fn progress(&self, _task_id: &str, operation: &str, percent: f64) {
            self.log.lock().unwrap().push(format!("progress:{operation}:{percent}"));
        }

        fn task_updated(&self, task: &TaskRecord) {
            self.log.lock().unwrap().push(format!("task:{}", task.status.as_str()));
        }

        fn file_added(&self, path: &Path) {
            self.log.lock().unwrap().push(format!("file:{}", path.display()));
        }
    }

    fn queue(engine: Arc<FakeEngine>, max: usize) -> (RenderQueue, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::default());
        (RenderQueue::new(engine, events.clone(), max), events)
    }

    async fn wait_for_status(queue: &RenderQueue, id: &str, status: TaskStatus) {
        for _ in 0..200 {
            if queue.tasks().get(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn wait_returns_completed_task_with_events() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let (queue, events) = queue(engine.clone(), 2);

        let task = queue
            .submit(PathBuf::from("media/a.mp4"), EditOperation::Speed { speed: 2.0 }, true)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.percent, 100.0);
        let output = task.output.unwrap();
        assert!(output.starts_with("media/a_speed_"));
        assert!(output.ends_with(".mp4"));

        let kinds = events.kinds();
        assert_eq!(kinds[0], "task:submitted");
        assert_eq!(kinds[1], "task:processing");
        assert!(kinds.iter().any(|k| k.starts_with("progress:speed:")));
        assert!(kinds.contains(&format!("file:{output}")));
        assert_eq!(kinds.last().unwrap(), "task:completed");

        let runs = engine.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].last().unwrap(), &output);
    }

    #[tokio::test]
    async fn outputs_are_reported_relative_to_the_media_root() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let events = Arc::new(RecordingEvents::default());
        let queue = RenderQueue::new(engine.clone(), events.clone(), 1).with_media_root("/srv/media");

        let task = queue
            .submit(
                PathBuf::from("/srv/media/clips/a.mp4"),
                EditOperation::Reverse,
                true,
            )
            .await
            .unwrap();
        let output = task.output.unwrap();
        assert!(output.starts_with("clips/a_reverse_"), "{output}");
        assert!(events.kinds().contains(&format!("file:{output}")));

        // ffmpeg still writes below the root.
        let runs = engine.runs.lock().unwrap();
        assert_eq!(runs[0].last().unwrap(), &format!("/srv/media/{output}"));
    }

    #[tokio::test]
    async fn engine_failure_marks_task_failed() {
        let (queue, events) = queue(FakeEngine::new(Behaviour::Fail), 2);
        let task = queue
            .submit(PathBuf::from("a.mp4"), EditOperation::Reverse, true)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("boom"));
        assert!(!events.kinds().iter().any(|k| k.starts_with("file:")));
    }

    #[tokio::test]
    async fn invalid_operation_creates_no_task() {
        let (queue, _events) = queue(FakeEngine::new(Behaviour::Succeed), 2);
        let err = queue
            .submit(PathBuf::from("a.mp4"), EditOperation::Rotate { angle: 33 }, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidParameter(_)));
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn cancel_kills_running_render() {
        let (queue, events) = queue(FakeEngine::new(Behaviour::Block), 2);
        let task = queue
            .submit(PathBuf::from("a.mp4"), EditOperation::Reverse, false)
            .await
            .unwrap();
        wait_for_status(&queue, &task.id, TaskStatus::Processing).await;

        let cancelled = queue.cancel(&task.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.tasks().get(&task.id).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(
            events.kinds().iter().filter(|k| *k == "task:cancelled").count(),
            1
        );
        assert!(queue.cancel(&task.id).is_err());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let (queue, _events) = queue(FakeEngine::new(Behaviour::Block), 1);
        let first = queue
            .submit(PathBuf::from("a.mp4"), EditOperation::Reverse, false)
            .await
            .unwrap();
        let second = queue
            .submit(PathBuf::from("b.mp4"), EditOperation::Reverse, false)
            .await
            .unwrap();

        wait_for_status(&queue, &first.id, TaskStatus::Processing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.tasks().get(&second.id).unwrap().status, TaskStatus::Submitted);

        queue.cancel(&first.id).unwrap();
        wait_for_status(&queue, &second.id, TaskStatus::Processing).await;
        queue.cancel(&second.id).unwrap();
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_permit() {
        let (queue, _events) = queue(FakeEngine::new(Behaviour::Block), 1);
        let running = queue
            .submit(PathBuf::from("a.mp4"), EditOperation::Reverse, false)
            .await
            .unwrap();
        let waiting = queue
            .submit(PathBuf::from("b.mp4"), EditOperation::Reverse, false)
            .await
            .unwrap();
        wait_for_status(&queue, &running.id, TaskStatus::Processing).await;

        queue.cancel(&waiting.id).unwrap();
        queue.cancel(&running.id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.tasks().get(&waiting.id).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn ffmpeg_engine_renders_real_file() {
        if !crate::render::binary_available("ffmpeg").await
            || !crate::render::binary_available("ffprobe").await
        {
            eprintln!("Skipping ffmpeg_engine_renders_real_file: ffmpeg not available");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("bars.mp4");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-f", "lavfi", "-i", "testsrc=duration=1:size=160x120:rate=10"])
            .args(["-pix_fmt", "yuv420p"])
            .arg(&source)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let events = Arc::new(RecordingEvents::default());
        let queue = RenderQueue::new(Arc::new(FfmpegEngine::default()), events, 1);
        let task = queue
            .submit(source, EditOperation::Rotate { angle: 90 }, true)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
        assert!(Path::new(task.output.as_deref().unwrap()).exists());
    }
}
