//! # Acquirer
//!
//! Resolves a job's input into a raw media file inside its workspace.
//!
//! - **Remote URL**: validated, then fetched by a [`MediaDownloader`] inside a
//!   worker slot; the result must be non-empty, inside the workspace and carry
//!   a known container signature, otherwise it is deleted.
//! - **Upload**: validated against the per-kind allow-list as soon as the file
//!   part's headers arrive, then streamed to disk under the size ceiling.
//!   Uploads never start a subprocess.

pub mod container;
pub mod download;
pub mod upload;

use crate::config::LimitsConfig;
use crate::error::{AcquisitionReason, AppError, AppResult};
use crate::job::{Job, SourceKind};
use crate::pool::{PoolError, WorkerPool};
use crate::workspace::Workspace;
use download::{DownloadError, DownloadRequest, MediaDownloader, MediaWanted};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use upload::{FormFields, UploadSource};

/// Multipart framing on top of the file itself; a `Content-Length` beyond
/// `ceiling + slack` cannot be a valid upload.
const MULTIPART_SLACK_BYTES: u64 = 64 * 1024;

/// Where a job's media comes from.
pub enum SourceRef {
    RemoteUrl(String),
    Upload(UploadSource),
}

/// Raw media ready for extraction.
#[derive(Debug)]
pub struct Acquired {
    pub raw_path: PathBuf,
    /// Client-side filename of an upload
    pub filename: Option<String>,
    /// Title reported by the downloader
    pub title: Option<String>,
    pub fields: FormFields,
}

pub struct Acquirer {
    downloader: Arc<dyn MediaDownloader>,
    pool: WorkerPool,
    download_timeout: Duration,
    limits: LimitsConfig,
}

/// Parse and check a remote media URL. Runs before any process is spawned.
pub fn validate_url(raw: &str) -> AppResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidInput("url is required".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| AppError::InvalidInput(format!("'{}' is not a valid URL: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return Err(AppError::InvalidInput(format!(
            "'{}' must be an absolute http(s) URL",
            raw
        )));
    }
    Ok(url)
}

impl Acquirer {
    pub fn new(
        downloader: Arc<dyn MediaDownloader>,
        pool: WorkerPool,
        download_timeout: Duration,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            downloader,
            pool,
            download_timeout,
            limits,
        }
    }

    /// `acquire(job) -> raw_media_path`
    pub async fn acquire(&self, job: &Job, source: SourceRef, workspace: &Workspace) -> AppResult<Acquired> {
        match source {
            SourceRef::RemoteUrl(url) => self.download(job, &url, MediaWanted::Audio, workspace).await,
            SourceRef::Upload(upload) => self.receive(job, upload, workspace).await,
        }
    }

    /// Fetch the merged video of a remote URL, for `/download-youtube`.
    pub async fn acquire_video(&self, job: &Job, url: &str, workspace: &Workspace) -> AppResult<Acquired> {
        self.download(job, url, MediaWanted::Video, workspace).await
    }

    /// Upload ceiling for a source kind.
    pub fn limit_for(&self, kind: SourceKind) -> u64 {
        match kind {
            SourceKind::AudioUpload => self.limits.max_audio_upload_bytes,
            SourceKind::VideoUpload | SourceKind::RemoteUrl => self.limits.max_video_upload_bytes,
        }
    }

    async fn receive(&self, job: &Job, upload: UploadSource, workspace: &Workspace) -> AppResult<Acquired> {
        let limit_bytes = self.limit_for(job.source_kind);
        if let Some(declared) = upload.declared_length {
            if declared > limit_bytes.saturating_add(MULTIPART_SLACK_BYTES) {
                return Err(AppError::FileTooLarge { limit_bytes });
            }
        }

        let received = upload::receive(job.source_kind, upload.parts, workspace.path(), limit_bytes).await?;
        info!(filename = %received.filename, bytes = received.bytes, "upload stored");

        Ok(Acquired {
            raw_path: received.path,
            filename: Some(received.filename),
            title: None,
            fields: received.fields,
        })
    }

    async fn download(&self, job: &Job, url: &str, wanted: MediaWanted, workspace: &Workspace) -> AppResult<Acquired> {
        let url = validate_url(url)?;

        let _slot = self.pool.acquire(job.deadline.instant()).await.map_err(|e| match e {
            PoolError::Deadline => AppError::Timeout("no worker slot became free before the job deadline".to_string()),
            PoolError::Closed => AppError::Internal(e.to_string()),
        })?;

        let request = DownloadRequest {
            url: url.as_str(),
            dir: workspace.path(),
            stem: match wanted {
                MediaWanted::Audio => "source",
                MediaWanted::Video => "video",
            },
            wanted,
            until: job.deadline.capped(self.download_timeout),
        };

        let downloaded = self.downloader.fetch(request).await.map_err(|e| match e {
            DownloadError::Failed { reason, detail } => AppError::AcquisitionFailed { reason, detail },
            DownloadError::TimedOut if job.deadline.is_expired() => {
                AppError::Timeout("the job deadline elapsed while downloading".to_string())
            }
            DownloadError::TimedOut => AppError::AcquisitionFailed {
                reason: AcquisitionReason::NetworkError,
                detail: "the download did not finish in time".to_string(),
            },
            DownloadError::Unavailable(detail) => AppError::Internal(detail),
        })?;

        verify_download(&downloaded.path, workspace.path())?;
        info!(path = %downloaded.path.display(), "download stored");

        Ok(Acquired {
            raw_path: downloaded.path,
            filename: None,
            title: downloaded.title,
            fields: FormFields::default(),
        })
    }
}

/// Reject a downloaded file that is outside the workspace, empty or not a
/// media container. A rejected file is removed before the error is returned.
fn verify_download(path: &Path, dir: &Path) -> AppResult<()> {
    let corrupt = |detail: String| AppError::AcquisitionFailed {
        reason: AcquisitionReason::NetworkError,
        detail,
    };

    let inside = match (path.canonicalize(), dir.canonicalize()) {
        (Ok(file), Ok(dir)) => file.starts_with(dir),
        _ => false,
    };
    if !inside {
        warn!(path = %path.display(), "downloaded file is missing or outside the workspace");
        return Err(corrupt("the downloaded file could not be found".to_string()));
    }

    let problem = match std::fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Some("the downloaded file is empty".to_string()),
        Ok(_) => match container::sniff_file(path) {
            Ok(Some(_)) => None,
            Ok(None) => Some("the downloaded file is not a recognised media container".to_string()),
            Err(e) => Some(format!("the downloaded file cannot be read: {}", e)),
        },
        Err(e) => Some(format!("the downloaded file cannot be read: {}", e)),
    };

    match problem {
        None => Ok(()),
        Some(detail) => {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove rejected download");
            }
            Err(corrupt(detail))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::{JobId, Language, OutputFormat};
    use crate::workspace::tests::test_root;
    use crate::workspace::WorkspaceManager;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Downloader that writes fixed bytes (or fails) and counts its calls.
    pub(crate) struct FakeDownloader {
        pub(crate) payload: Result<Vec<u8>, AcquisitionReason>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeDownloader {
        pub(crate) fn serving(payload: &[u8]) -> Self {
            Self {
                payload: Ok(payload.to_vec()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(reason: AcquisitionReason) -> Self {
            Self {
                payload: Err(reason),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MediaDownloader for FakeDownloader {
        fn fetch<'a>(&'a self, request: DownloadRequest<'a>) -> BoxFuture<'a, Result<download::Downloaded, DownloadError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match &self.payload {
                    Ok(bytes) => {
                        let ext = if request.wanted == MediaWanted::Video { "mp4" } else { "m4a" };
                        let path = request.dir.join(format!("{}.{}", request.stem, ext));
                        std::fs::write(&path, bytes).map_err(|e| DownloadError::Unavailable(e.to_string()))?;
                        Ok(download::Downloaded {
                            path,
                            title: Some("Fake: Title?".to_string()),
                        })
                    }
                    Err(reason) => Err(DownloadError::Failed {
                        reason: *reason,
                        detail: "fake failure".to_string(),
                    }),
                }
            })
        }
    }

    fn acquirer(downloader: Arc<dyn MediaDownloader>) -> Acquirer {
        Acquirer::new(
            downloader,
            WorkerPool::new(1),
            Duration::from_secs(30),
            crate::config::AppConfig::default().limits,
        )
    }

    fn remote_job() -> Job {
        Job::new(SourceKind::RemoteUrl, Language::Auto, OutputFormat::PlainText, Duration::from_secs(60))
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url("http://example.com/a.mp3").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("youtube.com/watch?v=abc").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("ftp://example.com/a.mp3").is_err());
    }

    #[tokio::test]
    async fn test_download_keeps_valid_container() {
        let root = test_root("acq");
        let manager = WorkspaceManager::new(&root).unwrap();
        let workspace = manager.acquire_scope(&JobId::new()).unwrap();
        let acquirer = acquirer(Arc::new(FakeDownloader::serving(b"\x00\x00\x00\x20ftypM4A data")));

        let acquired = acquirer
            .acquire(&remote_job(), SourceRef::RemoteUrl("https://example.com/v".into()), &workspace)
            .await
            .unwrap();
        assert!(acquired.raw_path.starts_with(workspace.path()));
        assert_eq!(acquired.title.as_deref(), Some("Fake: Title?"));

        drop(workspace);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_corrupt_download_is_removed() {
        let root = test_root("acq-corrupt");
        let manager = WorkspaceManager::new(&root).unwrap();
        let workspace = manager.acquire_scope(&JobId::new()).unwrap();
        let acquirer = acquirer(Arc::new(FakeDownloader::serving(b"<html>blocked</html>")));

        let err = acquirer
            .acquire(&remote_job(), SourceRef::RemoteUrl("https://example.com/v".into()), &workspace)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AcquisitionFailed { .. }));
        assert!(!workspace.file("source.m4a").exists());

        drop(workspace);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_download_failure_reason_is_kept() {
        let root = test_root("acq-private");
        let manager = WorkspaceManager::new(&root).unwrap();
        let workspace = manager.acquire_scope(&JobId::new()).unwrap();
        let acquirer = acquirer(Arc::new(FakeDownloader::failing(AcquisitionReason::Private)));

        let err = acquirer
            .acquire(&remote_job(), SourceRef::RemoteUrl("https://example.com/v".into()), &workspace)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some("private"));

        drop(workspace);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_declared_length_is_checked_first() {
        let root = test_root("acq-length");
        let manager = WorkspaceManager::new(&root).unwrap();
        let workspace = manager.acquire_scope(&JobId::new()).unwrap();
        let acquirer = acquirer(Arc::new(FakeDownloader::serving(b"")));
        let job = Job::new(SourceKind::AudioUpload, Language::Auto, OutputFormat::PlainText, Duration::from_secs(60));

        let upload = UploadSource {
            declared_length: Some(acquirer.limit_for(SourceKind::AudioUpload) * 2),
            parts: upload::tests::parts_of(vec![]),
        };
        let err = acquirer.acquire(&job, SourceRef::Upload(upload), &workspace).await.unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { .. }));

        drop(workspace);
        std::fs::remove_dir_all(root).ok();
    }
}
