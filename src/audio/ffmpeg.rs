//! ffmpeg/ffprobe backend for [`AudioTools`].
//!
//! Every output is first written to its [`partial_path`] sibling and renamed
//! into place once the command succeeds. A failed or interrupted run
//! therefore never leaves a file at the final path, and the split stage's
//! "keep existing tracks" rule only ever sees complete tracks.

use super::{partial_path, AudioChapter, AudioTools};
use crate::config::AudioConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs the ffmpeg and ffprobe binaries named in [`AudioConfig`].
#[derive(Debug, Clone)]
pub struct FfmpegAudio {
    ffmpeg: String,
    ffprobe: String,
}

#[derive(Debug, Deserialize)]
struct ProbeChapters {
    #[serde(default)]
    chapters: Vec<ProbeChapter>,
}

#[derive(Debug, Deserialize)]
struct ProbeChapter {
    start_time: String,
    end_time: String,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    title: Option<String>,
}

impl FfmpegAudio {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    async fn run_ffmpeg(&self, args: &[String]) -> SyncResult<()> {
        debug!("Running {} {}", self.ffmpeg, args.join(" "));
        let output = Command::new(&self.ffmpeg).args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Audio(format!(
                "ffmpeg failed with status {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Run ffmpeg with `args` followed by an output path, publishing the
    /// result at `dest` only on success.
    ///
    /// ## Parameters:
    /// - `args`: everything except the output file
    /// - `dest`: final location of the output
    async fn run_ffmpeg_into(&self, mut args: Vec<String>, dest: &Path) -> SyncResult<()> {
        let partial = partial_path(dest);
        args.push(path_arg(&partial));

        if let Err(err) = self.run_ffmpeg(&args).await {
            discard_partial(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }

    async fn run_ffprobe(&self, args: &[String]) -> SyncResult<String> {
        let output = Command::new(&self.ffprobe).args(args).output().await?;
        if !output.status.success() {
            return Err(SyncError::Audio(format!("ffprobe failed with status {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Output codec arguments; stream copy when no codec is configured.
fn codec_args(codec: Option<&str>, bitrate: Option<&str>) -> Vec<String> {
    match codec {
        Some(codec) => {
            let mut args = vec!["-c:a".to_string(), codec.to_string()];
            if let Some(bitrate) = bitrate {
                args.push("-b:a".to_string());
                args.push(bitrate.to_string());
            }
            args
        }
        None => vec!["-c:a".to_string(), "copy".to_string()],
    }
}

fn parse_seconds(value: &str) -> SyncResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| SyncError::Audio(format!("unexpected ffprobe time value {:?}", value)))
}

fn parse_chapters(json: &str) -> SyncResult<Vec<AudioChapter>> {
    let probe: ProbeChapters = serde_json::from_str(json)?;
    probe
        .chapters
        .into_iter()
        .map(|chapter| {
            Ok(AudioChapter {
                start: parse_seconds(&chapter.start_time)?,
                end: parse_seconds(&chapter.end_time)?,
                title: chapter.tags.and_then(|tags| tags.title),
            })
        })
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Remove an unfinished output; a missing file is fine.
async fn discard_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => debug!("Removed unfinished output {}", partial.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove unfinished output {}: {}", partial.display(), err),
    }
}

#[async_trait]
impl AudioTools for FfmpegAudio {
    async fn duration(&self, path: &Path) -> SyncResult<f64> {
        let stdout = self
            .run_ffprobe(&[
                "-v".to_string(),
                "error".to_string(),
                "-show_entries".to_string(),
                "format=duration".to_string(),
                "-of".to_string(),
                "default=noprint_wrappers=1:nokey=1".to_string(),
                path_arg(path),
            ])
            .await?;
        parse_seconds(&stdout)
    }

    async fn chapters(&self, path: &Path) -> SyncResult<Vec<AudioChapter>> {
        let stdout = self
            .run_ffprobe(&[
                "-v".to_string(),
                "error".to_string(),
                "-show_chapters".to_string(),
                "-of".to_string(),
                "json".to_string(),
                path_arg(path),
            ])
            .await?;
        parse_chapters(&stdout)
    }

    async fn split_track(
        &self,
        path: &Path,
        start: f64,
        end: f64,
        dest: &Path,
        codec: Option<&str>,
        bitrate: Option<&str>,
    ) -> SyncResult<bool> {
        if tokio::fs::try_exists(dest).await? {
            debug!("Keeping existing track {}", dest.display());
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut args = vec![
            "-nostdin".to_string(),
            "-y".to_string(),
            "-ss".to_string(),
            format!("{:.3}", start),
            "-to".to_string(),
            format!("{:.3}", end),
            "-i".to_string(),
            path_arg(path),
            "-vn".to_string(),
            "-map_chapters".to_string(),
            "-1".to_string(),
        ];
        args.extend(codec_args(codec, bitrate));

        self.run_ffmpeg_into(args, dest).await?;
        info!("Split {} [{:.1}s, {:.1}s) into {}", path.display(), start, end, dest.display());
        Ok(true)
    }

    async fn transcode_track(
        &self,
        path: &Path,
        dest: &Path,
        codec: Option<&str>,
        bitrate: Option<&str>,
    ) -> SyncResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if codec.is_none() {
            let partial = partial_path(dest);
            if let Err(err) = tokio::fs::copy(path, &partial).await {
                discard_partial(&partial).await;
                return Err(err.into());
            }
            tokio::fs::rename(&partial, dest).await?;
            debug!("Copied {} to {}", path.display(), dest.display());
            return Ok(());
        }

        let mut args = vec![
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            path_arg(path),
            "-vn".to_string(),
        ];
        args.extend(codec_args(codec, bitrate));

        self.run_ffmpeg_into(args, dest).await?;
        info!("Transcoded {} into {}", path.display(), dest.display());
        Ok(())
    }
}
