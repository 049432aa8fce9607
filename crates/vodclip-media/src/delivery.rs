//! Delivery mode selection and scratch files for buffered output.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use vodclip_models::{DeliveryMode, JobId};

use crate::error::MediaResult;

/// Pick how a clip reaches the caller.
///
/// An explicit request wins, then the global override, then the client
/// platform. Streamed is the default.
pub fn select_delivery_mode(
    requested: Option<DeliveryMode>,
    force_buffered: bool,
    user_agent: Option<&str>,
) -> DeliveryMode {
    if let Some(mode) = requested {
        return mode;
    }
    if force_buffered || user_agent.is_some_and(requires_indexed_container) {
        return DeliveryMode::Buffered;
    }
    DeliveryMode::Streamed
}

/// Apple WebKit players refuse fragmented MP4 without a seekable index.
pub fn requires_indexed_container(user_agent: &str) -> bool {
    const APPLE_MOBILE: &[&str] = &["iPhone", "iPad", "iPod", "AppleCoreMedia"];

    if APPLE_MOBILE.iter().any(|marker| user_agent.contains(marker)) {
        return true;
    }

    // iPadOS Safari reports a desktop Macintosh UA but keeps "Mobile/".
    user_agent.contains("Macintosh")
        && user_agent.contains("Mobile/")
        && user_agent.contains("Safari")
}

/// A uniquely named file removed when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserve a path in `dir` for this job's output.
    pub fn new(dir: &Path, job_id: &JobId) -> Self {
        let name = format!("vodclip-{}-{}.mp4", job_id, Uuid::new_v4().simple());
        Self {
            path: dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the written file.
    pub async fn size(&self) -> MediaResult<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Open for reading; the file is removed once the stream is dropped.
    pub async fn into_stream(self) -> MediaResult<ScratchStream> {
        let file = File::open(&self.path).await?;
        Ok(ScratchStream {
            inner: ReaderStream::new(file),
            _scratch: self,
        })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        // The unlink stays synchronous so the file is gone once the owner is.
        let on_worker = Handle::try_current()
            .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
        if on_worker {
            tokio::task::block_in_place(|| remove_scratch(&self.path));
        } else {
            remove_scratch(&self.path);
        }
    }
}

fn remove_scratch(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove scratch file: {}", e),
    }
}

/// Reads a scratch file and deletes it when done.
pub struct ScratchStream {
    inner: ReaderStream<File>,
    _scratch: ScratchFile,
}

impl Stream for ScratchStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create the scratch directory if it does not exist.
pub async fn ensure_scratch_dir(dir: &Path) -> MediaResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const IPADOS: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const MAC_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";
    const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

    #[test]
    fn test_platform_detection() {
        assert!(requires_indexed_container(IPHONE));
        assert!(requires_indexed_container(IPADOS));
        assert!(!requires_indexed_container(MAC_SAFARI));
        assert!(!requires_indexed_container(CHROME));
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(select_delivery_mode(None, false, Some(CHROME)), DeliveryMode::Streamed);
        assert_eq!(select_delivery_mode(None, false, None), DeliveryMode::Streamed);
        assert_eq!(select_delivery_mode(None, false, Some(IPHONE)), DeliveryMode::Buffered);
        assert_eq!(select_delivery_mode(None, true, Some(CHROME)), DeliveryMode::Buffered);
        assert_eq!(
            select_delivery_mode(Some(DeliveryMode::Buffered), false, Some(CHROME)),
            DeliveryMode::Buffered
        );
        assert_eq!(
            select_delivery_mode(Some(DeliveryMode::Streamed), true, Some(IPHONE)),
            DeliveryMode::Streamed
        );
    }

    #[test]
    fn test_scratch_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobId::new();
        let a = ScratchFile::new(dir.path(), &job);
        let b = ScratchFile::new(dir.path(), &job);
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_scratch_removed_after_read() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), &JobId::new());
        tokio::fs::write(scratch.path(), b"moov....mdat").await.unwrap();
        let path = scratch.path().to_path_buf();

        assert_eq!(scratch.size().await.unwrap(), 12);
        let body: Vec<u8> = scratch
            .into_stream()
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(body, b"moov....mdat");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), &JobId::new());
        tokio::fs::write(scratch.path(), b"partial").await.unwrap();
        let path = scratch.path().to_path_buf();

        let stream = scratch.into_stream().await.unwrap();
        drop(stream);
        assert!(!path.exists());

        // Never written: dropping is a no-op.
        drop(ScratchFile::new(dir.path(), &JobId::new()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scratch_removed_on_drop_in_worker() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), &JobId::new());
        tokio::fs::write(scratch.path(), b"partial").await.unwrap();
        let path = scratch.path().to_path_buf();

        tokio::spawn(async move { drop(scratch) }).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_removed_outside_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::new(dir.path(), &JobId::new());
        std::fs::write(scratch.path(), b"partial").unwrap();
        let path = scratch.path().to_path_buf();

        drop(scratch);
        assert!(!path.exists());
    }
}
