//! # Task Pipeline
//!
//! Turns an uploaded book (EPUB plus narration) into a synchronized EPUB in
//! three resumable stages, run by a single background worker.
//!
//! ## Key Components:
//! - **task**: stage/status model and the resume rule
//! - **store**: where task rows persist
//! - **events**: lifecycle notifications for callers
//! - **layout**: per-book directory structure
//! - **stages**: what each stage does
//! - **orchestrator**: the worker, its queue and cancellation

pub mod events;
pub mod layout;
pub mod orchestrator;
pub mod stages;
pub mod store;
pub mod task;

pub use events::{event_stream, BookEvent, EventBus, EventKind};
pub use layout::BookLayout;
pub use orchestrator::Orchestrator;
pub use stages::PipelineContext;
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore};
pub use task::{determine_remaining_tasks, ProcessingTask, TaskStatus, TaskType};
