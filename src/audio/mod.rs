//! # Audio Module
//!
//! Inspection, splitting and transcoding of a book's narration files. The
//! pipeline only talks to the [`AudioTools`] trait; [`FfmpegAudio`] is the
//! shipped implementation and shells out to ffmpeg/ffprobe.
//!
//! ## Key Components:
//! - **AudioTools**: duration, embedded chapters, split and transcode
//! - **FfmpegAudio**: command-line backend run through `tokio::process`
//! - **Media types**: file extension ↔ manifest media type and codec helpers

pub mod ffmpeg;

pub use ffmpeg::FfmpegAudio;

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker inserted before the extension of a track that is still being written.
const PARTIAL_MARKER: &str = ".partial";

/// A chapter marker embedded in an audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChapter {
    pub start: f64,
    pub end: f64,
    pub title: Option<String>,
}

/// Audio operations needed by the split stage.
#[async_trait]
pub trait AudioTools: Send + Sync {
    /// Length of the file in seconds.
    async fn duration(&self, path: &Path) -> SyncResult<f64>;

    /// Chapter markers embedded in the file, in order.
    async fn chapters(&self, path: &Path) -> SyncResult<Vec<AudioChapter>>;

    /// Write `[start, end)` of `path` to `dest`.
    ///
    /// Returns `false` when `dest` already existed and was left alone.
    async fn split_track(
        &self,
        path: &Path,
        start: f64,
        end: f64,
        dest: &Path,
        codec: Option<&str>,
        bitrate: Option<&str>,
    ) -> SyncResult<bool>;

    /// Re-encode `path` into `dest`, or copy it when no codec is given.
    async fn transcode_track(&self, path: &Path, dest: &Path, codec: Option<&str>, bitrate: Option<&str>)
        -> SyncResult<()>;
}

/// Manifest media type for an audio file, by extension.
pub fn media_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "m4b" | "mp4" | "aac" => "audio/mp4",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// True for files the split stage should pick up.
///
/// Unfinished outputs (see [`partial_path`]) never count, so a track left
/// behind by a crashed encoder is not mistaken for a finished one.
pub fn is_audio_file(path: &Path) -> bool {
    let partial = path
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(PARTIAL_MARKER));
    !partial && media_type_for(path).starts_with("audio/")
}

/// Sibling of `dest` that an encoder writes to before the result is moved into place.
///
/// The extension is kept so ffmpeg still picks the right muxer:
/// `00001.mp3` becomes `00001.partial.mp3`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let stem = dest.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match dest.extension() {
        Some(ext) => format!("{}{}.{}", stem, PARTIAL_MARKER, ext.to_string_lossy()),
        None => format!("{}{}", stem, PARTIAL_MARKER),
    };
    dest.with_file_name(name)
}

/// File extension produced by an ffmpeg encoder, if we know it.
pub fn extension_for_codec(codec: &str) -> Option<&'static str> {
    match codec {
        "libopus" | "opus" => Some("ogg"),
        "libmp3lame" | "mp3" => Some("mp3"),
        "aac" | "libfdk_aac" => Some("m4a"),
        "flac" => Some("flac"),
        _ => None,
    }
}
