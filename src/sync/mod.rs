//! # Synchronization
//!
//! Everything between a tagged chapter and its media overlay.
//!
//! ## Key Components:
//! - **tagger**: wraps sentences in identifiable spans
//! - **alignment**: locates sentences in the word timeline
//! - **interpolate**: fills sentences the aligner could not hear
//! - **smil**: renders overlay documents
//! - **synchronizer**: runs the above over a whole book

pub mod alignment;
pub mod interpolate;
pub mod smil;
pub mod synchronizer;
pub mod tagger;

pub use alignment::{
    get_chapter_duration, get_sentence_ranges, Aligner, AlignmentOptions, SentenceRange, SentenceRangeResult,
    TimelineCursor,
};
pub use interpolate::{fill_trailing_sentences, interpolate_sentence_ranges};
pub use smil::build_smil;
pub use synchronizer::{AudioAsset, ChapterFailure, SyncOptions, SyncReport, Synchronizer};
pub use tagger::{get_xhtml_sentences, sentence_id, tag_sentences, TaggedChapter};
