//! # Orchestrator
//!
//! Drives one job through `acquiring → extracting → transcribing → formatting`
//! under a single deadline.
//!
//! ## Guarantees:
//! - the deadline is checked before every stage, and every stage runs under a
//!   `timeout_at` so an in-flight subprocess is killed when it passes
//! - the workspace is released on every exit path: explicitly on return, by
//!   its `Drop` when the future is cancelled (client disconnect, shutdown)
//! - worker slots are held only by the stage that needs them and are
//!   returned by their guards
//!
//! ## Key Rust Concepts Used:
//! - **RAII guards**: `Workspace`, `WorkerSlot` and [`ActiveJob`] clean up in `Drop`
//! - **Instrument**: every job runs inside its own `tracing` span

use crate::acquire::download::{sanitize_title, MediaDownloader, YtDlpDownloader};
use crate::acquire::upload::{FormFields, UploadSource};
use crate::acquire::{validate_url, Acquirer, SourceRef};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::extract::Extractor;
use crate::format::{self, FormattedOutput};
use crate::job::{Deadline, Job, JobId, JobState, Language, OutputFormat, SourceKind};
use crate::pool::WorkerPool;
use crate::process;
use crate::transcription::{Tier, TierInfo, TranscriptResult, Transcriber};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceManager};
use actix_web::web::Bytes;
use futures_util::stream::{self, LocalBoxStream};
use futures_util::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, info_span, warn, Instrument};

const VIDEO_CHUNK_BYTES: usize = 64 * 1024;

/// Input of one transcription job.
pub struct JobRequest {
    pub source_kind: SourceKind,
    pub source: SourceRef,
    pub language: Language,
    pub output_format: OutputFormat,
}

impl JobRequest {
    pub fn remote(url: String, language: Language) -> Self {
        Self {
            source_kind: SourceKind::RemoteUrl,
            source: SourceRef::RemoteUrl(url),
            language,
            output_format: OutputFormat::PlainText,
        }
    }

    /// Language and output format of an upload arrive as form fields and
    /// are applied once acquisition has collected them.
    pub fn upload(kind: SourceKind, upload: UploadSource) -> Self {
        Self {
            source_kind: kind,
            source: SourceRef::Upload(upload),
            language: Language::default(),
            output_format: OutputFormat::default(),
        }
    }
}

/// Successful result of a transcription job.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub transcript: TranscriptResult,
    pub output: FormattedOutput,
    /// Client-side filename of an upload
    pub filename: Option<String>,
}

/// Job counters reported by `/health`.
#[derive(Debug, Default)]
pub struct JobCounters {
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JobCountersSnapshot {
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl JobCounters {
    pub fn snapshot(&self) -> JobCountersSnapshot {
        JobCountersSnapshot {
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    fn start(self: &Arc<Self>) -> ActiveJob {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveJob {
            counters: Arc::clone(self),
            recorded: false,
        }
    }
}

/// Counts a job as active while alive. A job dropped before it recorded an
/// outcome was cancelled and counts as failed.
pub struct ActiveJob {
    counters: Arc<JobCounters>,
    recorded: bool,
}

impl ActiveJob {
    fn record<T>(&mut self, result: &AppResult<T>) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let counter = match result {
            Ok(_) => &self.counters.completed,
            Err(AppError::Timeout(_)) => &self.counters.timed_out,
            Err(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        if !self.recorded {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A downloaded video waiting to be streamed to the client. The workspace
/// lives as long as the stream.
pub struct VideoDownload {
    pub filename: String,
    pub size: u64,
    file: tokio::fs::File,
    workspace: Workspace,
    active: ActiveJob,
}

impl VideoDownload {
    /// Body stream; the workspace is released when it ends or is dropped.
    pub fn into_stream(self) -> LocalBoxStream<'static, Result<Bytes, std::io::Error>> {
        let state = Some((self.file, self.workspace, self.active));
        stream::unfold(state, |state| async move {
            let (mut file, workspace, active) = state?;
            let mut buf = vec![0u8; VIDEO_CHUNK_BYTES];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some((file, workspace, active))))
                }
                Err(e) => {
                    warn!(path = %workspace.path().display(), error = %e, "video stream aborted");
                    Some((Err(e), None))
                }
            }
        })
        .boxed_local()
    }
}

pub struct Orchestrator {
    workspaces: WorkspaceManager,
    acquirer: Acquirer,
    extractor: Extractor,
    transcriber: Transcriber,
    pool: WorkerPool,
    job_deadline: Duration,
    counters: Arc<JobCounters>,
    yt_dlp: String,
}

impl Orchestrator {
    /// Production wiring: yt-dlp downloader and the configured tiers.
    pub fn from_config(config: &AppConfig) -> Result<Self, WorkspaceError> {
        let downloader = Arc::new(YtDlpDownloader::new(&config.tools.yt_dlp, &config.tools.ffmpeg));
        let tiers = config.tiers.iter().map(Tier::from_config).collect();
        Self::with_components(config, downloader, tiers)
    }

    pub fn with_components(
        config: &AppConfig,
        downloader: Arc<dyn MediaDownloader>,
        tiers: Vec<Tier>,
    ) -> Result<Self, WorkspaceError> {
        let pool = WorkerPool::new(config.pipeline.max_concurrent_jobs);
        Ok(Self {
            workspaces: WorkspaceManager::new(&config.pipeline.workspace_root)?,
            acquirer: Acquirer::new(downloader, pool.clone(), config.download_timeout(), config.limits.clone()),
            extractor: Extractor::new(&config.tools.ffmpeg, &config.tools.ffprobe, pool.clone(), config.extract_timeout()),
            transcriber: Transcriber::new(tiers, pool.clone(), config.pipeline.silence_tolerance_secs),
            pool,
            job_deadline: config.job_deadline(),
            counters: Arc::new(JobCounters::default()),
            yt_dlp: config.tools.yt_dlp.clone(),
        })
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn counters(&self) -> JobCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn tier_info(&self) -> Vec<TierInfo> {
        self.transcriber.tier_info()
    }

    /// External tools and whether they can be found.
    pub fn tool_availability(&self) -> Vec<(&'static str, String, bool)> {
        [
            ("ffmpeg", self.extractor.ffmpeg()),
            ("ffprobe", self.extractor.ffprobe()),
            ("yt_dlp", self.yt_dlp.as_str()),
        ]
        .into_iter()
        .map(|(name, program)| (name, program.to_string(), process::resolve_program(program).is_some()))
        .collect()
    }

    /// Run a transcription job to completion.
    pub async fn run(&self, request: JobRequest) -> AppResult<JobOutcome> {
        if let SourceRef::RemoteUrl(url) = &request.source {
            validate_url(url)?;
        }

        let mut job = Job::new(request.source_kind, request.language, request.output_format, self.job_deadline);
        let span = info_span!("job", job_id = %job.id, source_kind = job.source_kind.as_str());

        async move {
            let mut active = self.counters.start();
            info!(deadline_secs = self.job_deadline.as_secs(), "job started");

            let result = match self.workspaces.acquire_scope(&job.id) {
                Ok(mut workspace) => {
                    let result = self.stages(&mut job, request.source, &workspace).await;
                    self.workspaces.release_scope(&mut workspace);
                    result
                }
                Err(e) => Err(AppError::Internal(e.to_string())),
            };

            active.record(&result);
            match &result {
                Ok(outcome) => info!(
                    tier = %outcome.transcript.tier,
                    language = %outcome.transcript.detected_language,
                    segments = outcome.transcript.segments.len(),
                    "job done"
                ),
                Err(e) => {
                    let stage = job.state().as_str();
                    job.fail();
                    if e.is_client_error() {
                        info!(kind = e.kind(), stage, error = %e, "job rejected");
                    } else {
                        warn!(kind = e.kind(), stage, error = %e, "job failed");
                    }
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn stages(&self, job: &mut Job, source: SourceRef, workspace: &Workspace) -> AppResult<JobOutcome> {
        enter(job)?;
        let acquired = within(job.deadline, "acquisition", self.acquirer.acquire(job, source, workspace)).await?;
        apply_fields(job, &acquired.fields)?;

        enter(job)?;
        let audio = within(job.deadline, "extraction", self.extractor.extract(job, &acquired.raw_path, workspace)).await?;

        enter(job)?;
        let transcript = within(job.deadline, "transcription", self.transcriber.transcribe(job, &audio, workspace)).await?;

        enter(job)?;
        let output = format::format(&transcript, job.output_format, workspace).await?;

        job.advance()?;
        Ok(JobOutcome {
            job_id: job.id,
            transcript,
            output,
            filename: acquired.filename,
        })
    }

    /// Download a remote video for the client, without transcription.
    pub async fn download_video(&self, url: &str) -> AppResult<VideoDownload> {
        validate_url(url)?;

        let mut job = Job::new(SourceKind::RemoteUrl, Language::Auto, OutputFormat::PlainText, self.job_deadline);
        let span = info_span!("job", job_id = %job.id, source_kind = "video_download");

        async move {
            let mut active = self.counters.start();
            let result = self.fetch_video(&mut job, url).await;
            active.record(&result);
            match result {
                Ok((file, size, title, workspace)) => {
                    let filename = format!("{}.mp4", sanitize_title(title.as_deref().unwrap_or_default()));
                    info!(filename = %filename, size, "video ready");
                    Ok(VideoDownload {
                        filename,
                        size,
                        file,
                        workspace,
                        active,
                    })
                }
                Err(e) => {
                    job.fail();
                    warn!(kind = e.kind(), error = %e, "video download failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_video(
        &self,
        job: &mut Job,
        url: &str,
    ) -> AppResult<(tokio::fs::File, u64, Option<String>, Workspace)> {
        let workspace = self
            .workspaces
            .acquire_scope(&job.id)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        enter(job)?;
        let acquired = within(job.deadline, "download", self.acquirer.acquire_video(job, url, &workspace)).await?;
        let (file, size) = open_sized(&acquired.raw_path).await?;
        job.hand_off()?;
        Ok((file, size, acquired.title, workspace))
    }
}

/// Check the deadline, then move to the next stage.
fn enter(job: &mut Job) -> AppResult<JobState> {
    debug!(
        from = job.state().as_str(),
        remaining_secs = job.deadline.remaining().as_secs_f64(),
        "stage boundary"
    );
    if job.deadline.is_expired() {
        return Err(AppError::Timeout(format!(
            "the job deadline elapsed before leaving '{}'",
            job.state().as_str()
        )));
    }
    job.advance()
}

/// Run a stage, abandoning it (and whatever it spawned) at the deadline.
async fn within<T>(deadline: Deadline, stage: &str, fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    match tokio::time::timeout_at(deadline.instant(), fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!("the job deadline elapsed during {}", stage))),
    }
}

fn apply_fields(job: &mut Job, fields: &FormFields) -> AppResult<()> {
    if let Some(language) = &fields.language {
        job.requested_language = language.parse()?;
    }
    if let Some(output_format) = &fields.output_format {
        job.output_format = output_format.parse()?;
    }
    Ok(())
}

async fn open_sized(path: &Path) -> AppResult<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}
