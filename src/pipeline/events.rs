//! # Book Events
//!
//! Lifecycle notifications published by the pipeline worker. Subscribers get
//! a `broadcast` receiver or a `Stream` of events; a subscriber that falls
//! behind loses the oldest events rather than slowing the worker down.
//!
//! ## JSON Shape:
//! ```json
//! { "bookUuid": "…", "event": "taskProgressUpdated", "taskType": "SYNC_CHAPTERS", "progress": 0.5 }
//! ```

use super::task::TaskType;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::trace;
use uuid::Uuid;

/// One notification about one book.
///
/// ## Serialization:
/// `kind` is flattened, so the event name and its fields sit next to
/// `bookUuid` in a single JSON object (see the module docs).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEvent {
    /// Book the event is about
    pub book_uuid: Uuid,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What happened.
///
/// ## Ordering Per Book:
/// `processingQueued` → `processingStarted` → for each remaining stage
/// `taskTypeUpdated`, any number of `taskProgressUpdated`, `taskCompleted` →
/// exactly one terminal event (`processingCompleted`, `processingFailed` or
/// `processingStopped`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    /// Accepted by the worker; `position` counts waiting books including this one
    ProcessingQueued { position: usize },
    /// The worker picked the book up
    ProcessingStarted,
    /// A stage is about to run
    TaskTypeUpdated { task_type: TaskType },
    /// Fraction of the running stage done, in `[0, 1]`
    TaskProgressUpdated { task_type: TaskType, progress: f64 },
    TaskCompleted { task_type: TaskType },
    ProcessingCompleted,
    /// `task_type` is `None` when the failure happened outside any stage
    /// (for example the task store could not be read)
    ProcessingFailed {
        task_type: Option<TaskType>,
        progress: f64,
        error: String,
    },
    ProcessingStopped,
}

impl EventKind {
    /// The `event` tag this kind serializes with.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ProcessingQueued { .. } => "processingQueued",
            EventKind::ProcessingStarted => "processingStarted",
            EventKind::TaskTypeUpdated { .. } => "taskTypeUpdated",
            EventKind::TaskProgressUpdated { .. } => "taskProgressUpdated",
            EventKind::TaskCompleted { .. } => "taskCompleted",
            EventKind::ProcessingCompleted => "processingCompleted",
            EventKind::ProcessingFailed { .. } => "processingFailed",
            EventKind::ProcessingStopped => "processingStopped",
        }
    }

    /// Whether the worker is done with the book for now.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::ProcessingCompleted | EventKind::ProcessingFailed { .. } | EventKind::ProcessingStopped
        )
    }
}

/// Publish/subscribe handle owned by an orchestrator.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BookEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers may fall up to `capacity` events behind.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an event to every current subscriber.
    pub fn publish(&self, book_uuid: Uuid, kind: EventKind) {
        trace!("Event {} for book {}", kind.name(), book_uuid);
        // Nobody listening is fine
        let _ = self.sender.send(BookEvent { book_uuid, kind });
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.sender.subscribe()
    }
}

/// Adapt a receiver into a stream, skipping over lag notifications.
pub fn event_stream(receiver: broadcast::Receiver<BookEvent>) -> impl Stream<Item = BookEvent> {
    BroadcastStream::new(receiver).filter_map(|item| item.ok())
}
