//! On-disk layout of one book's inputs and artifacts.
//!
//! Each stage finds its inputs and leaves its outputs under
//! `{data_dir}/books/{uuid}/`; see [`crate::config::StorageConfig`] for the
//! full tree.

use crate::audio::is_audio_file;
use crate::error::SyncResult;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Paths of one book. Nothing is created until a stage writes.
#[derive(Debug, Clone)]
pub struct BookLayout {
    book_uuid: Uuid,
    root: PathBuf,
}

impl BookLayout {
    pub fn new(data_dir: &Path, book_uuid: Uuid) -> Self {
        Self {
            book_uuid,
            root: data_dir.join("books").join(book_uuid.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The uploaded EPUB; never modified.
    pub fn original_epub(&self) -> PathBuf {
        self.root.join("original").join("book.epub")
    }

    pub fn original_audio_dir(&self) -> PathBuf {
        self.root.join("original").join("audio")
    }

    /// Numbered tracks (`00001.mp3`, ...) written by the split stage.
    pub fn processed_audio_dir(&self) -> PathBuf {
        self.root.join("processed").join("audio")
    }

    pub fn transcriptions_dir(&self) -> PathBuf {
        self.root.join("transcriptions")
    }

    /// Where the transcription of a processed audio file is cached.
    pub fn transcription_path(&self, audio: &Path) -> PathBuf {
        let stem = audio.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        self.transcriptions_dir().join(format!("{}.json", stem))
    }

    /// The final book with media overlays.
    pub fn synced_epub(&self) -> PathBuf {
        self.root.join("synced").join(format!("{}.epub", self.book_uuid))
    }
}

/// Write `contents` to `path` through a `.tmp` sibling and a rename, so the
/// path either holds the previous contents or the complete new ones.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Audio files directly inside `dir`, sorted by name. A missing directory is empty.
pub async fn list_audio_files(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_audio_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let book = Uuid::nil();
        let layout = BookLayout::new(Path::new("/data"), book);
        let root = format!("/data/books/{}", book);
        assert_eq!(layout.original_epub(), PathBuf::from(format!("{}/original/book.epub", root)));
        assert_eq!(
            layout.transcription_path(Path::new("/x/00003.mp3")),
            PathBuf::from(format!("{}/transcriptions/00003.json", root))
        );
        assert_eq!(layout.synced_epub(), PathBuf::from(format!("{}/synced/{}.epub", root, book)));
    }

    #[tokio::test]
    async fn test_list_audio_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.m4b", "cover.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_audio_files(dir.path()).await.unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.m4b", "b.mp3"]);

        assert!(list_audio_files(&dir.path().join("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_tracks_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("00001.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("00002.partial.mp3"), b"half").unwrap();
        let files = list_audio_files(dir.path()).await.unwrap();
        assert_eq!(files, vec![dir.path().join("00001.mp3")]);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcriptions/00001.json");
        write_atomic(&path, b"{\"a\":1}").await.unwrap();
        write_atomic(&path, b"{\"a\":2}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":2}");
        assert!(!dir.path().join("transcriptions/00001.json.tmp").exists());
    }
}
