//! # Processing Tasks
//!
//! The persistent record of how far a book got through the pipeline.
//!
//! ## Task Lifecycle:
//! 1. **STARTED**: created when the worker reaches the stage (or reset to it on retry)
//! 2. **COMPLETED**: the stage body returned successfully
//! 3. **IN_ERROR**: the stage body failed; the next run retries from here
//!
//! A cancelled stage keeps whatever status it had, so it resumes later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    SplitChapters,
    TranscribeChapters,
    SyncChapters,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::SplitChapters, TaskType::TranscribeChapters, TaskType::SyncChapters];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SplitChapters => "SPLIT_CHAPTERS",
            TaskType::TranscribeChapters => "TRANSCRIBE_CHAPTERS",
            TaskType::SyncChapters => "SYNC_CHAPTERS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Started,
    Completed,
    InError,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Started => "STARTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::InError => "IN_ERROR",
        }
    }
}

/// One stage of one book's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTask {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Fraction of the stage done, 0..=1
    pub progress: f64,
    pub book_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    /// A fresh `STARTED` task that has not been stored yet.
    pub fn new(book_uuid: Uuid, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Started,
            progress: 0.0,
            book_uuid,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stages a run of `book_uuid` still has to execute, in order.
///
/// With no existing rows every stage is returned fresh. Otherwise every stage
/// after the last `COMPLETED` one is returned: existing rows as they are
/// (so an `IN_ERROR` stage is retried) and fresh tasks for stages never
/// reached.
pub fn determine_remaining_tasks(book_uuid: Uuid, existing: &[ProcessingTask]) -> Vec<ProcessingTask> {
    let mut sorted: Vec<&ProcessingTask> = existing.iter().collect();
    sorted.sort_by_key(|task| task.task_type);
    sorted.dedup_by_key(|task| task.task_type);

    let resume_after = sorted
        .iter()
        .rev()
        .find(|task| task.status == TaskStatus::Completed)
        .map(|task| task.task_type);

    TaskType::ALL
        .iter()
        .filter(|task_type| resume_after.map_or(true, |done| **task_type > done))
        .map(|task_type| {
            sorted
                .iter()
                .find(|task| task.task_type == *task_type)
                .map(|task| (*task).clone())
                .unwrap_or_else(|| ProcessingTask::new(book_uuid, *task_type))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(book: Uuid, task_type: TaskType, status: TaskStatus) -> ProcessingTask {
        ProcessingTask {
            status,
            ..ProcessingTask::new(book, task_type)
        }
    }

    fn types(tasks: &[ProcessingTask]) -> Vec<TaskType> {
        tasks.iter().map(|task| task.task_type).collect()
    }

    #[test]
    fn test_no_tasks_yields_every_stage() {
        let book = Uuid::new_v4();
        let remaining = determine_remaining_tasks(book, &[]);
        assert_eq!(types(&remaining), TaskType::ALL.to_vec());
        assert!(remaining.iter().all(|t| t.status == TaskStatus::Started && t.book_uuid == book));
    }

    #[test]
    fn test_resume_after_completed_split() {
        let book = Uuid::new_v4();
        let existing = vec![task(book, TaskType::SplitChapters, TaskStatus::Completed)];
        let remaining = determine_remaining_tasks(book, &existing);
        assert_eq!(types(&remaining), vec![TaskType::TranscribeChapters, TaskType::SyncChapters]);
    }

    #[test]
    fn test_failed_sync_is_retried_alone() {
        let book = Uuid::new_v4();
        let failed = task(book, TaskType::SyncChapters, TaskStatus::InError);
        let existing = vec![
            failed.clone(),
            task(book, TaskType::SplitChapters, TaskStatus::Completed),
            task(book, TaskType::TranscribeChapters, TaskStatus::Completed),
        ];
        let remaining = determine_remaining_tasks(book, &existing);
        assert_eq!(remaining, vec![failed]);
    }

    #[test]
    fn test_interrupted_stage_keeps_its_row() {
        let book = Uuid::new_v4();
        let running = task(book, TaskType::SplitChapters, TaskStatus::Started);
        let remaining = determine_remaining_tasks(book, &[running.clone()]);
        assert_eq!(remaining[0].uuid, running.uuid);
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn test_fully_completed_book_has_nothing_left() {
        let book = Uuid::new_v4();
        let existing: Vec<_> = TaskType::ALL
            .iter()
            .map(|t| task(book, *t, TaskStatus::Completed))
            .collect();
        assert!(determine_remaining_tasks(book, &existing).is_empty());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_value(task(Uuid::nil(), TaskType::TranscribeChapters, TaskStatus::InError)).unwrap();
        assert_eq!(json["type"], "TRANSCRIBE_CHAPTERS");
        assert_eq!(json["status"], "IN_ERROR");
        assert!(json.get("bookUuid").is_some());
    }
}
