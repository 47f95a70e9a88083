//! # Error Handling
//!
//! Error types shared by every stage of the synchronization pipeline.
//!
//! ## Error Categories:
//! - **Parse**: a chapter document is malformed (no `<html>` or `<body>`).
//!   Fatal for that chapter only; the synchronizer isolates it.
//! - **Xml / Epub / Zip**: the container or one of its documents could not be
//!   read or written.
//! - **Audio / Transcription**: an external collaborator failed.
//! - **Rules**: the embedded phonetic rule data is invalid.
//! - **Store / Worker**: task rows could not be persisted, or the background
//!   worker went away.
//! - **Cancelled**: cooperative cancellation. Not a failure; the orchestrator
//!   reports it as `processingStopped` and leaves the task status untouched.
//!
//! A sentence that cannot be aligned is *not* an error: the alignment engine
//! skips it and interpolation fills the gap later.
//!
//! ## Usage Example:
//! ```rust
//! use narration_sync::error::{SyncError, SyncResult};
//!
//! fn require_body(found: bool) -> SyncResult<()> {
//!     if !found {
//!         return Err(SyncError::Parse("chapter has no <body> element".to_string()));
//!     }
//!     Ok(())
//! }
//! # assert!(require_body(true).is_ok());
//! ```

use thiserror::Error;

/// Errors produced by the synchronization pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed chapter document (missing `html` or `body`)
    #[error("Parse error: {0}")]
    Parse(String),

    /// The XML reader rejected a document
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Structural problem with the EPUB container (no OPF, unknown item, ...)
    #[error("EPUB error: {0}")]
    Epub(String),

    /// Zip archive could not be read or written
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audio utility failure (ffmpeg/ffprobe)
    #[error("Audio processing error: {0}")]
    Audio(String),

    /// Transcription engine failure
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Invalid phonetic rule data
    #[error("Phonetic rule error: {0}")]
    Rules(String),

    /// Task store failure
    #[error("Task store error: {0}")]
    Store(String),

    /// The pipeline worker stopped or a blocking job panicked
    #[error("Worker error: {0}")]
    Worker(String),

    /// The running stage observed a cancellation request
    #[error("Processing was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<quick_xml::events::attributes::AttrError> for SyncError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        SyncError::Xml(quick_xml::Error::InvalidAttr(err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Rules(err.to_string())
    }
}

/// Shorthand for results produced by the library.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::Parse("no body".to_string()).is_cancelled());
    }

    #[test]
    fn test_error_messages() {
        let err = SyncError::Parse("missing <body>".to_string());
        assert_eq!(err.to_string(), "Parse error: missing <body>");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SyncError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
