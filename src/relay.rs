use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::SourceChat;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message has no file handle")]
    MissingHandle,

    #[error("download of {handle} timed out after {after:?}")]
    Timeout { handle: String, after: Duration },

    #[error("failed to download {handle}: {reason}")]
    Download { handle: String, reason: String },

    #[error("failed to write scratch file: {0}")]
    Scratch(#[from] std::io::Error),
}

impl RelayError {
    pub fn download(handle: &str, reason: impl std::fmt::Display) -> Self {
        Self::Download {
            handle: handle.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Media category of a relayed file. Bale picks its upload endpoint from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Photo,
    Video,
    Audio,
    Document,
}

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Photo => "photo",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Document => "document",
        }
    }

    pub fn default_file_name(self) -> &'static str {
        match self {
            FileCategory::Photo => "photo.jpg",
            FileCategory::Video => "video.mp4",
            FileCategory::Audio => "audio.mp3",
            FileCategory::Document => "document",
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file on disk that is removed when this guard is dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    async fn create(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        // Guard exists before the write so a partial file is cleaned up too.
        let scratch = Self {
            path: dir.join(format!("{}{}", uuid::Uuid::new_v4(), extension)),
        };
        tokio::fs::write(&scratch.path, bytes).await?;
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// A downloaded file, held in memory and mirrored to a scratch file.
#[derive(Debug)]
pub struct RelayedFile {
    bytes: Vec<u8>,
    name: String,
    category: FileCategory,
    scratch: ScratchFile,
}

impl RelayedFile {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> FileCategory {
        self.category
    }

    pub fn local_path(&self) -> &Path {
        self.scratch.path()
    }

    #[cfg(test)]
    pub(crate) async fn for_test(
        dir: &Path,
        name: &str,
        category: FileCategory,
        bytes: &[u8],
    ) -> Self {
        Self {
            bytes: bytes.to_vec(),
            name: name.to_string(),
            category,
            scratch: ScratchFile::create(dir, name, bytes).await.unwrap(),
        }
    }
}

/// Pulls files from the source platform so they can be re-uploaded.
pub struct FileRelay {
    source: Arc<dyn SourceChat>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl FileRelay {
    pub fn new(source: Arc<dyn SourceChat>, scratch_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            source,
            scratch_dir,
            timeout,
        }
    }

    pub async fn fetch(
        &self,
        handle: &str,
        category: FileCategory,
        file_name: Option<&str>,
    ) -> Result<RelayedFile, RelayError> {
        let bytes = tokio::time::timeout(self.timeout, self.source.download(handle))
            .await
            .map_err(|_| RelayError::Timeout {
                handle: handle.to_string(),
                after: self.timeout,
            })??;

        let name = file_name
            .filter(|name| !name.is_empty())
            .unwrap_or(category.default_file_name())
            .to_string();
        let scratch = ScratchFile::create(&self.scratch_dir, &name, &bytes).await?;

        debug!(
            handle,
            category = %category,
            size = bytes.len(),
            path = %scratch.path().display(),
            "relayed file"
        );

        Ok(RelayedFile {
            bytes,
            name,
            category,
            scratch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubSource {
        delay: Duration,
    }

    #[async_trait]
    impl SourceChat for StubSource {
        async fn download(&self, handle: &str) -> Result<Vec<u8>, RelayError> {
            tokio::time::sleep(self.delay).await;
            if handle == "bad" {
                return Err(RelayError::download(handle, "file not found"));
            }
            Ok(format!("bytes of {}", handle).into_bytes())
        }

        async fn reply(&self, _chat_id: i64, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn relay(dir: &Path, delay: Duration, timeout: Duration) -> FileRelay {
        FileRelay::new(Arc::new(StubSource { delay }), dir.to_path_buf(), timeout)
    }

    #[tokio::test]
    async fn test_fetch_writes_scratch_file_and_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay(dir.path(), Duration::ZERO, Duration::from_secs(5));

        let file = relay
            .fetch("abc", FileCategory::Photo, None)
            .await
            .unwrap();
        assert_eq!(file.bytes(), b"bytes of abc");
        assert_eq!(file.name(), "photo.jpg");
        assert_eq!(file.category(), FileCategory::Photo);

        let path = file.local_path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes of abc");

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_fetch_keeps_document_name() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay(dir.path(), Duration::ZERO, Duration::from_secs(5));

        let file = relay
            .fetch("doc", FileCategory::Document, Some("report.pdf"))
            .await
            .unwrap();
        assert_eq!(file.name(), "report.pdf");
        assert_eq!(file.local_path().extension().unwrap(), "pdf");
    }

    #[tokio::test]
    async fn test_download_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay(dir.path(), Duration::ZERO, Duration::from_secs(5));

        let err = relay
            .fetch("bad", FileCategory::Video, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Download { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay(dir.path(), Duration::from_secs(5), Duration::from_millis(20));

        let err = relay
            .fetch("slow", FileCategory::Document, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }));
    }

    #[test]
    fn test_category_names() {
        assert_eq!(FileCategory::Photo.to_string(), "photo");
        assert_eq!(FileCategory::Audio.default_file_name(), "audio.mp3");
    }
}
