//! Bounded-concurrency uploader that drains a directory of serialized
//! submission packages into an object store, tracking aggregate progress
//! under a single lock and isolating per-file failures from the pool.

mod error;
mod progress;

pub use error::{Result, UploadError};
pub use progress::ProgressTracker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// In-flight transfers are capped at this many concurrent uploads.
const MAX_CONCURRENCY: usize = 5;

/// Objects at or above this size are uploaded as a multipart transfer.
const MULTIPART_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Chunk size used both for progress granularity and multipart part size.
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Service-required object metadata recorded alongside an uploaded package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub name: String,
    pub size_kb: u64,
}

/// Outcome of draining one directory through the pool.
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub uploaded: Vec<ObjectMetadata>,
    pub failed: u64,
}

impl UploadSummary {
    pub fn completed(&self) -> u64 {
        self.uploaded.len() as u64
    }
}

/// Bounded-concurrency uploader over an object store backend.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            concurrency: MAX_CONCURRENCY,
        }
    }

    /// An in-memory backend, for tests and local dry runs.
    pub fn memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Override the default concurrency cap of 5. Exposed for tests that
    /// need to observe the bound at a smaller scale.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload every `.zip` file directly under `dir`, deleting each source
    /// file on success when `delete_on_success` is set. One task per file;
    /// a task's failure increments the summary's `failed` count and does
    /// not stop the remaining tasks.
    pub async fn upload_directory(&self, dir: &Path, delete_on_success: bool) -> Result<UploadSummary> {
        let files = enumerate_zip_files(dir)?;
        let total_size: u64 = files.iter().map(|(_, size)| *size).sum();
        let tracker = Arc::new(ProgressTracker::new(files.len() as u64, total_size));

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (path, size) in files {
            let permit = sem.clone().acquire_owned().await.expect("semaphore never closed");
            let store = self.store.clone();
            let tracker = tracker.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = upload_one(&store, &path, size, &tracker).await;
                match &outcome {
                    Ok(_) => {
                        tracker.mark_completed();
                        tracing::info!(path = %path.display(), "upload complete");
                        if delete_on_success {
                            if let Err(e) = tokio::fs::remove_file(&path).await {
                                tracing::warn!(path = %path.display(), error = %e, "source delete failed after successful upload");
                            }
                        }
                    }
                    Err(e) => {
                        tracker.mark_failed();
                        tracing::error!(path = %path.display(), error = %e, "upload failed");
                    }
                }
                outcome
            });
        }

        let mut summary = UploadSummary::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(meta)) => summary.uploaded.push(meta),
                Ok(Err(_)) => summary.failed += 1,
                Err(join_err) => {
                    tracing::error!(error = %join_err, "upload task panicked");
                    summary.failed += 1;
                }
            }
        }
        tracker.finish();
        Ok(summary)
    }
}

fn enumerate_zip_files(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    if !dir.is_dir() {
        return Err(UploadError::NotADirectory { path: dir.to_path_buf() });
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|source| UploadError::Io {
        path: dir.to_path_buf(),
        source,
    })? {
        let entry = entry.map_err(|source| UploadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|source| UploadError::Io { path: path.clone(), source })?
            .len();
        out.push((path, size));
    }
    out.sort();
    Ok(out)
}

async fn upload_one(
    store: &Arc<dyn ObjectStore>,
    path: &PathBuf,
    size: u64,
    tracker: &Arc<ProgressTracker>,
) -> Result<ObjectMetadata> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::InvalidFileName { path: path.clone() })?
        .to_string();
    let key = Uuid::new_v4().to_string();
    // Round-half KB, matching the reference uploader's `round(st_size/1024)`.
    let size_kb = (size + 512) / 1024;
    let object_path = StorePath::from(key.clone());

    tracing::info!(path = %path.display(), %key, "upload start");

    if size >= MULTIPART_THRESHOLD {
        upload_multipart(store, &object_path, path, tracker).await?;
    } else {
        let bytes = read_whole_with_progress(path, tracker).await?;
        store
            .put(&object_path, PutPayload::from_bytes(bytes))
            .await
            .map_err(|source| UploadError::Store { key: key.clone(), source })?;
    }

    Ok(ObjectMetadata { key, name, size_kb })
}

async fn read_whole_with_progress(path: &Path, tracker: &Arc<ProgressTracker>) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await.map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        tracker.on_bytes(n as u64);
    }
    Ok(Bytes::from(out))
}

async fn upload_multipart(
    store: &Arc<dyn ObjectStore>,
    object_path: &StorePath,
    path: &Path,
    tracker: &Arc<ProgressTracker>,
) -> Result<()> {
    let key = object_path.to_string();
    let mut upload = store
        .put_multipart(object_path)
        .await
        .map_err(|source| UploadError::Store { key: key.clone(), source })?;

    let mut file = tokio::fs::File::open(path).await.map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        tracker.on_bytes(chunk.len() as u64);
        upload
            .put_part(PutPayload::from_bytes(chunk))
            .await
            .map_err(|source| UploadError::Store { key: key.clone(), source })?;
    }

    upload.complete().await.map_err(|source| UploadError::Store { key, source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_zip(dir: &std::path::Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[tokio::test]
    async fn uploads_every_zip_and_skips_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_zip(dir.path(), "a.zip", b"one");
        write_zip(dir.path(), "b.zip", b"two-bytes!");
        std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let uploader = Uploader::memory();
        let summary = uploader.upload_directory(dir.path(), false).await.unwrap();

        assert_eq!(summary.completed(), 2);
        assert_eq!(summary.failed, 0);
        let names: Vec<_> = summary.uploaded.iter().map(|m| m.name.clone()).collect();
        assert!(names.contains(&"a.zip".to_string()));
        assert!(names.contains(&"b.zip".to_string()));
        for meta in &summary.uploaded {
            assert!(!meta.key.is_empty());
        }
    }

    #[tokio::test]
    async fn deletes_source_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        write_zip(dir.path(), "a.zip", b"payload");

        let uploader = Uploader::memory();
        uploader.upload_directory(dir.path(), true).await.unwrap();

        assert!(!dir.path().join("a.zip").exists());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_configured_cap() {
        use object_store::throttle::{ThrottleConfig, ThrottledStore};

        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0u8; 600];
        for i in 0..12 {
            write_zip(dir.path(), &format!("pkg-{i}.zip"), &payload);
        }

        let inner = object_store::memory::InMemory::new();
        let throttled = ThrottledStore::new(
            inner,
            ThrottleConfig {
                wait_put_per_call: Duration::from_millis(100),
                ..Default::default()
            },
        );
        let uploader = Uploader::new(Arc::new(throttled)).with_concurrency(5);

        let summary = uploader.upload_directory(dir.path(), false).await.unwrap();
        assert_eq!(summary.completed(), 12);
        assert_eq!(summary.failed, 0);
        for meta in &summary.uploaded {
            assert_eq!(meta.name.ends_with(".zip"), true);
            assert!(meta.size_kb >= 1);
        }
    }

    #[tokio::test]
    async fn rejects_a_path_that_is_not_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let uploader = Uploader::memory();
        let err = uploader.upload_directory(file.path(), false).await.unwrap_err();
        assert!(matches!(err, UploadError::NotADirectory { .. }));
    }
}
