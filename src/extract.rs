//! # Extractor
//!
//! Normalizes any container/codec into 16 kHz mono 16-bit PCM WAV, so the
//! transcription tiers never branch on the source format.
//!
//! ## Steps:
//! 1. `ffprobe` lists the audio streams of the raw file
//! 2. `ffmpeg` decodes and resamples into `<workspace>/audio.wav`
//! 3. the WAV header is read back with `hound` to confirm the canonical format
//!    and to get the duration

use crate::error::{AppError, AppResult, ExtractionReason};
use crate::job::Job;
use crate::pool::{PoolError, WorkerPool};
use crate::process::{self, ProcessError};
use crate::workspace::Workspace;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// File name of the normalized audio inside a workspace.
pub const NORMALIZED_FILE: &str = "audio.wav";

/// Canonical audio handed to the Transcriber.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

pub struct Extractor {
    ffmpeg: String,
    ffprobe: String,
    pool: WorkerPool,
    timeout: Duration,
}

impl Extractor {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, pool: WorkerPool, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            pool,
            timeout,
        }
    }

    pub fn ffmpeg(&self) -> &str {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &str {
        &self.ffprobe
    }

    /// `extract(raw_media_path) -> normalized_audio_path`
    pub async fn extract(&self, job: &Job, raw: &Path, workspace: &Workspace) -> AppResult<NormalizedAudio> {
        let _slot = self.pool.acquire(job.deadline.instant()).await.map_err(|e| match e {
            PoolError::Deadline => AppError::Timeout("no worker slot became free before the job deadline".to_string()),
            PoolError::Closed => AppError::Internal(e.to_string()),
        })?;
        let until = job.deadline.capped(self.timeout);

        let audio_streams = self.probe(raw, until).await?;
        if audio_streams == 0 {
            return Err(AppError::ExtractionFailed {
                reason: ExtractionReason::UnreadableContainer,
                detail: "the file has no audio track".to_string(),
            });
        }

        let output = workspace.file(NORMALIZED_FILE);
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(raw)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .args(["-f", "wav"])
            .arg(&output);

        process::run(command, until)
            .await
            .map_err(|e| map_process_error(e, ExtractionReason::DecodeError, job))?;

        let duration_seconds = read_normalized(&output)?;
        info!(duration_seconds, "audio normalized");

        Ok(NormalizedAudio {
            path: output,
            duration_seconds,
        })
    }

    /// Number of audio streams in `raw`.
    async fn probe(&self, raw: &Path, until: tokio::time::Instant) -> AppResult<usize> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-show_entries", "stream=codec_type", "-of", "json"])
            .arg(raw);

        let output = process::run(command, until).await.map_err(|e| match e {
            ProcessError::TimedOut { .. } => AppError::Timeout("probing the media took too long".to_string()),
            other => map_unreadable(other),
        })?;

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout).map_err(|e| AppError::ExtractionFailed {
            reason: ExtractionReason::UnreadableContainer,
            detail: format!("unexpected ffprobe output: {}", e),
        })?;
        let audio = probe
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some("audio"))
            .count();
        debug!(streams = probe.streams.len(), audio, "media probed");
        Ok(audio)
    }
}

fn map_unreadable(err: ProcessError) -> AppError {
    match err {
        ProcessError::NotFound { .. } | ProcessError::Spawn { .. } => AppError::Internal(err.to_string()),
        other => AppError::ExtractionFailed {
            reason: ExtractionReason::UnreadableContainer,
            detail: other.to_string(),
        },
    }
}

fn map_process_error(err: ProcessError, reason: ExtractionReason, job: &Job) -> AppError {
    match err {
        ProcessError::TimedOut { .. } if job.deadline.is_expired() => {
            AppError::Timeout("the job deadline elapsed during extraction".to_string())
        }
        ProcessError::TimedOut { .. } => AppError::Timeout("extraction exceeded its time budget".to_string()),
        ProcessError::NotFound { .. } | ProcessError::Spawn { .. } => AppError::Internal(err.to_string()),
        other => AppError::ExtractionFailed {
            reason,
            detail: other.to_string(),
        },
    }
}

/// Confirm the canonical format and return the duration in seconds.
pub fn read_normalized(path: &Path) -> AppResult<f64> {
    let reader = hound::WavReader::open(path).map_err(|e| AppError::ExtractionFailed {
        reason: ExtractionReason::DecodeError,
        detail: format!("normalized audio is unreadable: {}", e),
    })?;

    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE || spec.channels != CHANNELS || spec.bits_per_sample != BITS_PER_SAMPLE {
        return Err(AppError::ExtractionFailed {
            reason: ExtractionReason::DecodeError,
            detail: format!(
                "expected {}Hz mono {}-bit, got {}Hz {}ch {}-bit",
                SAMPLE_RATE, BITS_PER_SAMPLE, spec.sample_rate, spec.channels, spec.bits_per_sample
            ),
        });
    }

    // Frames, i.e. samples per channel
    let frames = reader.duration();
    if frames == 0 {
        return Err(AppError::ExtractionFailed {
            reason: ExtractionReason::ZeroDuration,
            detail: "the audio track contains no samples".to_string(),
        });
    }
    Ok(frames as f64 / SAMPLE_RATE as f64)
}
