//! # Worker Orchestrator
//!
//! One background worker processes books one at a time, in the order they
//! were started. Callers never touch the worker's state: they send commands
//! over a channel and watch the event bus.
//!
//! ## Worker States:
//! - **Idle**: waiting for the next command
//! - **Running**: one book's stages are executing; commands are still
//!   handled (new books queue up, cancellation reaches the running book)
//!
//! A failed stage marks its task `IN_ERROR` and ends that book only.
//! Cancelling a queued book drops it at once; cancelling the running book
//! trips its token, and its current stage stops at the next check with the
//! task status left as it was.

use super::events::{event_stream, BookEvent, EventBus, EventKind};
use super::layout::BookLayout;
use super::stages::{run_stage, PipelineContext, StageProgress};
use super::store::TaskStore;
use super::task::{determine_remaining_tasks, ProcessingTask, TaskStatus};
use crate::error::{SyncError, SyncResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
enum Command {
    Start { book_uuid: Uuid, restart: bool },
    Cancel { book_uuid: Uuid },
}

#[derive(Debug, Clone, Copy)]
struct QueuedBook {
    book_uuid: Uuid,
    restart: bool,
}

/// Handle to the pipeline worker.
///
/// Dropping every handle stops the worker after it cancels the running book.
pub struct Orchestrator {
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
    worker: JoinHandle<()>,
}

impl Orchestrator {
    /// Spawn the worker on the current tokio runtime.
    pub fn new(store: Arc<dyn TaskStore>, ctx: PipelineContext, events: EventBus) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            ctx,
            events: events.clone(),
            commands: receiver,
            queue: VecDeque::new(),
        };
        let worker = tokio::spawn(worker.run());
        Self {
            commands,
            events,
            worker,
        }
    }

    /// Queue a book. With `restart`, its task rows are dropped first so every stage reruns.
    pub fn start(&self, book_uuid: Uuid, restart: bool) -> SyncResult<()> {
        self.send(Command::Start { book_uuid, restart })
    }

    /// Drop a queued book, or stop the running one.
    pub fn cancel(&self, book_uuid: Uuid) -> SyncResult<()> {
        self.send(Command::Cancel { book_uuid })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> impl Stream<Item = BookEvent> {
        event_stream(self.events.subscribe())
    }

    /// Stop accepting commands and wait for the worker to exit.
    pub async fn shutdown(self) -> SyncResult<()> {
        drop(self.commands);
        self.worker
            .await
            .map_err(|e| SyncError::Worker(format!("worker task failed: {}", e)))
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::Worker("pipeline worker has stopped".to_string()))
    }
}

struct Worker {
    store: Arc<dyn TaskStore>,
    ctx: PipelineContext,
    events: EventBus,
    commands: mpsc::UnboundedReceiver<Command>,
    queue: VecDeque<QueuedBook>,
}

impl Worker {
    async fn run(mut self) {
        info!("Pipeline worker started");
        loop {
            let Some(next) = self.queue.pop_front() else {
                match self.commands.recv().await {
                    Some(command) => self.handle(command, None),
                    None => break,
                }
                continue;
            };

            let cancel = CancellationToken::new();
            let run = process_book(
                next,
                self.store.clone(),
                self.ctx.clone(),
                self.events.clone(),
                cancel.clone(),
            );
            tokio::pin!(run);

            let mut closed = false;
            loop {
                tokio::select! {
                    _ = &mut run => break,
                    command = self.commands.recv(), if !closed => match command {
                        Some(command) => self.handle(command, Some((next.book_uuid, &cancel))),
                        None => {
                            closed = true;
                            cancel.cancel();
                        }
                    },
                }
            }
            if closed {
                break;
            }
        }
        info!("Pipeline worker stopped");
    }

    fn handle(&mut self, command: Command, running: Option<(Uuid, &CancellationToken)>) {
        match command {
            Command::Start { book_uuid, restart } => {
                let already_running = running.map(|(book, _)| book) == Some(book_uuid);
                if already_running || self.queue.iter().any(|queued| queued.book_uuid == book_uuid) {
                    debug!("Book {} is already queued", book_uuid);
                    return;
                }
                self.queue.push_back(QueuedBook { book_uuid, restart });
                info!("Queued book {} (position {})", book_uuid, self.queue.len());
                self.events.publish(
                    book_uuid,
                    EventKind::ProcessingQueued {
                        position: self.queue.len(),
                    },
                );
            }
            Command::Cancel { book_uuid } => {
                if let Some(index) = self.queue.iter().position(|queued| queued.book_uuid == book_uuid) {
                    self.queue.remove(index);
                    info!("Removed book {} from the queue", book_uuid);
                    self.events.publish(book_uuid, EventKind::ProcessingStopped);
                    return;
                }
                match running {
                    Some((book, cancel)) if book == book_uuid => {
                        info!("Cancelling book {}", book_uuid);
                        cancel.cancel();
                    }
                    _ => debug!("Cancel for book {} which is not queued", book_uuid),
                }
            }
        }
    }
}

/// Terminal outcome of one book's run.
enum Outcome {
    Completed,
    Stopped,
    /// A stage failed and already published `processingFailed`
    Failed,
}

async fn process_book(
    book: QueuedBook,
    store: Arc<dyn TaskStore>,
    ctx: PipelineContext,
    events: EventBus,
    cancel: CancellationToken,
) {
    let book_uuid = book.book_uuid;
    info!("Processing book {}", book_uuid);
    events.publish(book_uuid, EventKind::ProcessingStarted);

    match run_book(book, store.as_ref(), &ctx, &events, &cancel).await {
        Ok(Outcome::Completed) => {
            info!("Finished book {}", book_uuid);
            events.publish(book_uuid, EventKind::ProcessingCompleted);
        }
        Ok(Outcome::Stopped) => {
            info!("Stopped book {}", book_uuid);
            events.publish(book_uuid, EventKind::ProcessingStopped);
        }
        Ok(Outcome::Failed) => {}
        // The store failed around the stages
        Err(err) => {
            error!("Book {} failed outside a stage: {}", book_uuid, err);
            events.publish(
                book_uuid,
                EventKind::ProcessingFailed {
                    task_type: None,
                    progress: 0.0,
                    error: err.to_string(),
                },
            );
        }
    }
}

async fn run_book(
    book: QueuedBook,
    store: &dyn TaskStore,
    ctx: &PipelineContext,
    events: &EventBus,
    cancel: &CancellationToken,
) -> SyncResult<Outcome> {
    let book_uuid = book.book_uuid;
    if book.restart {
        info!("Restarting book {} from scratch", book_uuid);
        store.delete_tasks_for_book(book_uuid).await?;
    }

    let existing = store.get_tasks_for_book(book_uuid).await?;
    let remaining = determine_remaining_tasks(book_uuid, &existing);
    let layout = BookLayout::new(&ctx.config.storage.data_dir, book_uuid);
    debug!(
        "Book {}: {} stages left ({} rows stored)",
        book_uuid,
        remaining.len(),
        existing.len()
    );

    for task in remaining {
        if cancel.is_cancelled() {
            return Ok(Outcome::Stopped);
        }

        if existing.iter().any(|stored| stored.uuid == task.uuid) {
            if task.status != TaskStatus::Started || task.progress > 0.0 {
                store.update_task_status(task.uuid, TaskStatus::Started).await?;
                store.update_task_progress(task.uuid, 0.0).await?;
            }
        } else {
            store.create_task(&task).await?;
        }
        events.publish(book_uuid, EventKind::TaskTypeUpdated { task_type: task.task_type });
        info!("Book {}: running {}", book_uuid, task.task_type.as_str());

        match run_task(&task, store, ctx, &layout, events, cancel).await {
            Ok(()) => {
                store.update_task_progress(task.uuid, 1.0).await?;
                store.update_task_status(task.uuid, TaskStatus::Completed).await?;
                events.publish(book_uuid, EventKind::TaskCompleted { task_type: task.task_type });
            }
            Err((err, _)) if err.is_cancelled() => return Ok(Outcome::Stopped),
            Err((err, progress)) => {
                error!("Book {}: {} failed: {}", book_uuid, task.task_type.as_str(), err);
                store.update_task_status(task.uuid, TaskStatus::InError).await?;
                events.publish(
                    book_uuid,
                    EventKind::ProcessingFailed {
                        task_type: Some(task.task_type),
                        progress,
                        error: err.to_string(),
                    },
                );
                return Ok(Outcome::Failed);
            }
        }
    }

    Ok(Outcome::Completed)
}

/// Run one stage, relaying its progress to the store and the event bus.
///
/// On failure the error comes back with the last progress the stage reported.
async fn run_task(
    task: &ProcessingTask,
    store: &dyn TaskStore,
    ctx: &PipelineContext,
    layout: &BookLayout,
    events: &EventBus,
    cancel: &CancellationToken,
) -> Result<(), (SyncError, f64)> {
    let (sender, mut receiver) = watch::channel(0.0);
    let stage = run_stage(task.task_type, ctx, layout, cancel, StageProgress::new(sender));
    tokio::pin!(stage);

    let mut reported = 0.0;
    let result = loop {
        tokio::select! {
            result = &mut stage => break result,
            Ok(()) = receiver.changed() => {
                let progress = *receiver.borrow_and_update();
                relay_progress(task, store, events, progress).await;
                reported = progress;
            }
        }
    };

    let last = *receiver.borrow();
    if last != reported {
        relay_progress(task, store, events, last).await;
    }
    result.map_err(|err| (err, last))
}

async fn relay_progress(task: &ProcessingTask, store: &dyn TaskStore, events: &EventBus, progress: f64) {
    if let Err(err) = store.update_task_progress(task.uuid, progress).await {
        warn!("Could not record progress of task {}: {}", task.uuid, err);
    }
    events.publish(
        task.book_uuid,
        EventKind::TaskProgressUpdated {
            task_type: task.task_type,
            progress,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioChapter, AudioTools};
    use crate::config::AppConfig;
    use crate::epub::fixtures::{chapter, sample_epub};
    use crate::pipeline::store::MemoryTaskStore;
    use crate::pipeline::task::TaskType;
    use crate::sync::alignment::fixtures::transcription;
    use crate::transcription::{Transcription, TranscriptionEngine, TranscriptionSettings};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const NARRATION: &str = "it was a bright cold day in april";

    /// Copies files instead of running ffmpeg.
    #[derive(Default)]
    struct CopyAudio {
        transcodes: AtomicUsize,
    }

    #[async_trait]
    impl AudioTools for CopyAudio {
        async fn duration(&self, _path: &Path) -> SyncResult<f64> {
            Ok(4.0)
        }

        async fn chapters(&self, _path: &Path) -> SyncResult<Vec<AudioChapter>> {
            Ok(Vec::new())
        }

        async fn split_track(
            &self,
            _path: &Path,
            _start: f64,
            _end: f64,
            _dest: &Path,
            _codec: Option<&str>,
            _bitrate: Option<&str>,
        ) -> SyncResult<bool> {
            Ok(false)
        }

        async fn transcode_track(
            &self,
            path: &Path,
            dest: &Path,
            _codec: Option<&str>,
            _bitrate: Option<&str>,
        ) -> SyncResult<()> {
            self.transcodes.fetch_add(1, Ordering::SeqCst);
            tokio::fs::copy(path, dest).await?;
            Ok(())
        }
    }

    /// Returns a fixed narration, fails on demand, or never answers.
    #[derive(Default)]
    struct ScriptedEngine {
        fail: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl TranscriptionEngine for ScriptedEngine {
        async fn transcribe(
            &self,
            audio_path: &Path,
            _prompt: Option<&str>,
            _locale: &str,
            _settings: &TranscriptionSettings,
        ) -> SyncResult<Transcription> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Transcription("recognizer crashed".to_string()));
            }
            Ok(transcription(&audio_path.to_string_lossy(), NARRATION, 0.0))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        data_dir: std::path::PathBuf,
        store: Arc<MemoryTaskStore>,
        audio: Arc<CopyAudio>,
        engine: Arc<ScriptedEngine>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let mut config = AppConfig::default();
        config.storage.data_dir = data_dir.clone();

        let store = Arc::new(MemoryTaskStore::new());
        let audio = Arc::new(CopyAudio::default());
        let engine = Arc::new(ScriptedEngine::default());
        let ctx = PipelineContext {
            config: Arc::new(config),
            audio: audio.clone(),
            engine: engine.clone(),
            settings: TranscriptionSettings::default(),
        };
        let orchestrator = Orchestrator::new(store.clone(), ctx, EventBus::new(256));
        Fixture {
            _dir: dir,
            data_dir,
            store,
            audio,
            engine,
            orchestrator,
        }
    }

    fn add_book(data_dir: &Path) -> Uuid {
        let book = Uuid::new_v4();
        let layout = BookLayout::new(data_dir, book);
        let epub = sample_epub(&[("ch1", &chapter("<p>It was a bright cold day in April.</p>"))]);
        std::fs::create_dir_all(layout.original_audio_dir()).unwrap();
        std::fs::write(layout.original_epub(), epub.to_bytes().unwrap()).unwrap();
        std::fs::write(layout.original_audio_dir().join("part1.mp3"), b"ID3").unwrap();
        book
    }

    /// Events for `book` up to and including its next terminal event.
    async fn events_until_done(receiver: &mut broadcast::Receiver<BookEvent>, book: Uuid) -> Vec<EventKind> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
                .await
                .expect("timed out waiting for events")
                .unwrap();
            if event.book_uuid != book {
                continue;
            }
            let done = event.kind.is_terminal();
            seen.push(event.kind);
            if done {
                return seen;
            }
        }
    }

    async fn wait_for(receiver: &mut broadcast::Receiver<BookEvent>, book: Uuid, kind: EventKind) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
                .await
                .expect("timed out waiting for events")
                .unwrap();
            if event.book_uuid == book && event.kind == kind {
                return;
            }
        }
    }

    fn names(events: &[EventKind]) -> Vec<&'static str> {
        events
            .iter()
            .map(EventKind::name)
            .filter(|name| *name != "taskProgressUpdated")
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_produces_synced_epub() {
        let fx = fixture();
        let book = add_book(&fx.data_dir);
        let mut events = fx.orchestrator.subscribe();

        fx.orchestrator.start(book, false).unwrap();
        let seen = events_until_done(&mut events, book).await;

        assert_eq!(
            names(&seen),
            vec![
                "processingQueued",
                "processingStarted",
                "taskTypeUpdated",
                "taskCompleted",
                "taskTypeUpdated",
                "taskCompleted",
                "taskTypeUpdated",
                "taskCompleted",
                "processingCompleted",
            ]
        );

        let tasks = fx.store.get_tasks_for_book(book).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed && t.progress == 1.0));

        let layout = BookLayout::new(&fx.data_dir, book);
        assert!(layout.processed_audio_dir().join("00001.mp3").exists());
        assert!(layout.transcriptions_dir().join("00001.json").exists());

        let synced = crate::epub::Epub::open(layout.synced_epub()).unwrap();
        assert_eq!(synced.manifest_item("ch1").unwrap().media_overlay.as_deref(), Some("ch1_overlay"));
        let smil = String::from_utf8(synced.read_item("ch1_overlay").unwrap().to_vec()).unwrap();
        assert!(smil.contains("src=\"../Audio/00001.mp3\""));
    }

    #[tokio::test]
    async fn test_failed_stage_resumes_where_it_stopped() {
        let fx = fixture();
        let book = add_book(&fx.data_dir);
        let mut events = fx.orchestrator.subscribe();

        fx.engine.fail.store(true, Ordering::SeqCst);
        fx.orchestrator.start(book, false).unwrap();
        let seen = events_until_done(&mut events, book).await;

        match seen.last() {
            Some(EventKind::ProcessingFailed { task_type, error, .. }) => {
                assert_eq!(*task_type, Some(TaskType::TranscribeChapters));
                assert!(error.contains("recognizer crashed"));
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        let tasks = fx.store.get_tasks_for_book(book).await.unwrap();
        let status = |t: TaskType| tasks.iter().find(|task| task.task_type == t).map(|task| task.status);
        assert_eq!(status(TaskType::SplitChapters), Some(TaskStatus::Completed));
        assert_eq!(status(TaskType::TranscribeChapters), Some(TaskStatus::InError));
        assert_eq!(status(TaskType::SyncChapters), None);

        fx.engine.fail.store(false, Ordering::SeqCst);
        fx.orchestrator.start(book, false).unwrap();
        let seen = events_until_done(&mut events, book).await;
        assert_eq!(seen.last(), Some(&EventKind::ProcessingCompleted));
        assert_eq!(fx.audio.transcodes.load(Ordering::SeqCst), 1);
        assert!(seen.contains(&EventKind::TaskTypeUpdated {
            task_type: TaskType::TranscribeChapters
        }));
        assert!(!seen.contains(&EventKind::TaskTypeUpdated {
            task_type: TaskType::SplitChapters
        }));
        assert_eq!(fx.store.get_tasks_for_book(book).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_restart_reruns_every_stage() {
        let fx = fixture();
        let book = add_book(&fx.data_dir);
        let mut events = fx.orchestrator.subscribe();

        fx.orchestrator.start(book, false).unwrap();
        events_until_done(&mut events, book).await;
        let first: Vec<Uuid> = fx.store.get_tasks_for_book(book).await.unwrap().iter().map(|t| t.uuid).collect();

        fx.orchestrator.start(book, true).unwrap();
        let seen = events_until_done(&mut events, book).await;
        assert_eq!(seen.last(), Some(&EventKind::ProcessingCompleted));

        let second = fx.store.get_tasks_for_book(book).await.unwrap();
        assert_eq!(second.len(), 3);
        assert!(second.iter().all(|t| !first.contains(&t.uuid)));
    }

    #[tokio::test]
    async fn test_cancel_queued_and_running_books() {
        let fx = fixture();
        let first = add_book(&fx.data_dir);
        let second = add_book(&fx.data_dir);
        let mut events = fx.orchestrator.subscribe();

        fx.engine.hang.store(true, Ordering::SeqCst);
        fx.orchestrator.start(first, false).unwrap();
        let transcribing = EventKind::TaskTypeUpdated {
            task_type: TaskType::TranscribeChapters,
        };
        wait_for(&mut events, first, transcribing).await;

        fx.orchestrator.start(second, false).unwrap();
        wait_for(&mut events, second, EventKind::ProcessingQueued { position: 1 }).await;

        fx.orchestrator.cancel(second).unwrap();
        wait_for(&mut events, second, EventKind::ProcessingStopped).await;

        fx.orchestrator.cancel(first).unwrap();
        wait_for(&mut events, first, EventKind::ProcessingStopped).await;

        let tasks = fx.store.get_tasks_for_book(first).await.unwrap();
        let transcribe = tasks
            .iter()
            .find(|t| t.task_type == TaskType::TranscribeChapters)
            .unwrap();
        assert_eq!(transcribe.status, TaskStatus::Started);
        assert!(fx.store.get_tasks_for_book(second).await.unwrap().is_empty());

        fx.orchestrator.shutdown().await.unwrap();
    }
}
