//! # Task Storage
//!
//! Key-value persistence for [`ProcessingTask`] rows. Only the pipeline
//! worker writes; anything else may read.
//!
//! ## Implementations:
//! - **JsonTaskStore**: every row in one JSON file, rewritten on each change
//! - **MemoryTaskStore**: nothing survives the process; used by tests

use super::layout::write_atomic;
use super::task::{ProcessingTask, TaskStatus};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Persistence for task rows.
///
/// ## Contract:
/// - Rows are keyed by their own `uuid` and grouped by `book_uuid`
/// - Updates of an unknown row fail with `SyncError::Store`
/// - Every update refreshes `updated_at`
///
/// ## Thread Safety:
/// Implementations are shared as `Arc<dyn TaskStore>` between the worker
/// and readers, so each method takes `&self` and locks internally.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new row.
    async fn create_task(&self, task: &ProcessingTask) -> SyncResult<()>;

    /// The book's rows, in creation order.
    async fn get_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<Vec<ProcessingTask>>;

    async fn update_task_status(&self, task_uuid: Uuid, status: TaskStatus) -> SyncResult<()>;

    /// Record progress, clamped to `[0, 1]`.
    async fn update_task_progress(&self, task_uuid: Uuid, progress: f64) -> SyncResult<()>;

    /// Forget every row of a book; used when a book is restarted.
    async fn delete_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<()>;
}

fn find_task(tasks: &mut [ProcessingTask], task_uuid: Uuid) -> SyncResult<&mut ProcessingTask> {
    tasks
        .iter_mut()
        .find(|task| task.uuid == task_uuid)
        .ok_or_else(|| SyncError::Store(format!("no task with id {}", task_uuid)))
}

fn set_status(tasks: &mut [ProcessingTask], task_uuid: Uuid, status: TaskStatus) -> SyncResult<()> {
    let task = find_task(tasks, task_uuid)?;
    task.status = status;
    task.updated_at = Utc::now();
    Ok(())
}

fn set_progress(tasks: &mut [ProcessingTask], task_uuid: Uuid, progress: f64) -> SyncResult<()> {
    let task = find_task(tasks, task_uuid)?;
    task.progress = progress.clamp(0.0, 1.0);
    task.updated_at = Utc::now();
    Ok(())
}

/// In-process task rows.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<ProcessingTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: &ProcessingTask) -> SyncResult<()> {
        self.tasks.write().await.push(task.clone());
        Ok(())
    }

    async fn get_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<Vec<ProcessingTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.iter().filter(|task| task.book_uuid == book_uuid).cloned().collect())
    }

    async fn update_task_status(&self, task_uuid: Uuid, status: TaskStatus) -> SyncResult<()> {
        set_status(&mut self.tasks.write().await, task_uuid, status)
    }

    async fn update_task_progress(&self, task_uuid: Uuid, progress: f64) -> SyncResult<()> {
        set_progress(&mut self.tasks.write().await, task_uuid, progress)
    }

    async fn delete_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<()> {
        self.tasks.write().await.retain(|task| task.book_uuid != book_uuid);
        Ok(())
    }
}

/// Task rows kept in a JSON file.
///
/// The whole file is loaded on open and rewritten after every change. That
/// suits the handful of rows a library holds per book; writes go through
/// [`write_atomic`], so the file is always either the old or the new set.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    tasks: RwLock<Vec<ProcessingTask>>,
}

impl JsonTaskStore {
    /// Load the rows in `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let tasks = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        debug!("Loaded {} task rows from {}", tasks.len(), path.display());
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    /// Write the rows through a temporary file so a crash never leaves half a file.
    async fn persist(&self, tasks: &[ProcessingTask]) -> SyncResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(tasks)?).await
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn create_task(&self, task: &ProcessingTask) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        tasks.push(task.clone());
        self.persist(&tasks).await
    }

    async fn get_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<Vec<ProcessingTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.iter().filter(|task| task.book_uuid == book_uuid).cloned().collect())
    }

    async fn update_task_status(&self, task_uuid: Uuid, status: TaskStatus) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        set_status(&mut tasks, task_uuid, status)?;
        self.persist(&tasks).await
    }

    async fn update_task_progress(&self, task_uuid: Uuid, progress: f64) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        set_progress(&mut tasks, task_uuid, progress)?;
        self.persist(&tasks).await
    }

    async fn delete_tasks_for_book(&self, book_uuid: Uuid) -> SyncResult<()> {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|task| task.book_uuid != book_uuid);
        self.persist(&tasks).await
    }
}
