//! # narration-sync
//!
//! Aligns an ebook with its narrated audiobook and writes an EPUB3 whose
//! chapters carry SMIL media overlays, so reading systems can highlight each
//! sentence while it is spoken.
//!
//! ## Module Map:
//! - **text**: sentence segmentation and word handling
//! - **phonetic**: rule-based phonetic codes for fuzzy word matching
//! - **xml / epub**: document trees and the EPUB container
//! - **sync**: tagging, alignment, interpolation, SMIL and the synchronizer
//! - **audio / transcription**: collaborators behind async traits
//! - **pipeline**: the resumable three-stage worker
//! - **config / error**: ambient configuration and error types

pub mod audio;
pub mod config;
pub mod epub;
pub mod error;
pub mod phonetic;
pub mod pipeline;
pub mod sync;
pub mod text;
pub mod transcription;
pub mod xml;

pub use error::{SyncError, SyncResult};
