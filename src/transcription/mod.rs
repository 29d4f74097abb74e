//! # Transcription Module
//!
//! Runs an ordered chain of speech-to-text tiers against the normalized audio
//! until one succeeds.
//!
//! ## Escalation, not retry:
//! Each tier is attempted at most once per job. A non-zero exit, a timeout or
//! malformed output moves straight on to the next tier; the order is fixed by
//! configuration and never rearranged. Only when every tier has failed does
//! the job see an error (`TranscriptionUnavailable`).
//!
//! ## Key Components:
//! - **TranscriptionBackend**: the trait every tier implements
//! - **Tiers**: whisper.cpp, the Python whisper CLI, OpenAI-compatible APIs
//! - **normalize**: turns raw tier output into ordered, clamped segments

pub mod backend;
pub mod normalize;
pub mod openai_whisper;
pub mod remote_api;
pub mod whisper_cpp;

use crate::config::TierConfig;
use crate::error::{AppError, AppResult};
use crate::extract::NormalizedAudio;
use crate::job::Job;
use crate::pool::{PoolError, WorkerPool};
use crate::workspace::Workspace;
use backend::{TierContext, TierError, TranscriptionBackend};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use backend::Segment;

/// Reported when neither the tier nor the request names a language.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Final transcript of a job.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptResult {
    pub segments: Vec<Segment>,
    pub detected_language: String,
    pub duration_seconds: f64,
    /// Name of the tier that produced it
    pub tier: String,
}

/// One position in the fallback chain.
#[derive(Clone)]
pub struct Tier {
    pub backend: Arc<dyn TranscriptionBackend>,
    pub timeout: Duration,
}

/// Health view of a tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    pub position: usize,
    pub kind: String,
    pub target: String,
    pub timeout_secs: u64,
    pub available: bool,
}

impl Tier {
    pub fn from_config(config: &TierConfig) -> Self {
        let backend: Arc<dyn TranscriptionBackend> = match config {
            TierConfig::WhisperCpp { binary, model, threads, .. } => {
                Arc::new(whisper_cpp::WhisperCppBackend::new(binary.clone(), model.clone(), *threads))
            }
            TierConfig::OpenaiWhisper { binary, model, threads, .. } => {
                Arc::new(openai_whisper::OpenAiWhisperBackend::new(binary.clone(), model.clone(), *threads))
            }
            TierConfig::RemoteApi { endpoint, model, api_key, .. } => {
                Arc::new(remote_api::RemoteApiBackend::new(endpoint.clone(), model.clone(), api_key.clone()))
            }
        };
        Self {
            backend,
            timeout: config.timeout(),
        }
    }
}

pub struct Transcriber {
    tiers: Vec<Tier>,
    pool: WorkerPool,
    silence_tolerance: f64,
}

impl Transcriber {
    pub fn new(tiers: Vec<Tier>, pool: WorkerPool, silence_tolerance: f64) -> Self {
        Self {
            tiers,
            pool,
            silence_tolerance,
        }
    }

    pub fn tier_info(&self) -> Vec<TierInfo> {
        self.tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| TierInfo {
                position: i + 1,
                kind: tier.backend.name().to_string(),
                target: tier.backend.target(),
                timeout_secs: tier.timeout.as_secs(),
                available: tier.backend.is_available(),
            })
            .collect()
    }

    /// `transcribe(normalized_audio_path, requested_language) -> TranscriptResult`
    pub async fn transcribe(&self, job: &Job, audio: &NormalizedAudio, workspace: &Workspace) -> AppResult<TranscriptResult> {
        let hint = job.requested_language.code();
        let mut failures = Vec::with_capacity(self.tiers.len());

        for (index, tier) in self.tiers.iter().enumerate() {
            let name = tier.backend.name();
            if job.deadline.is_expired() {
                return Err(AppError::Timeout(format!("the job deadline elapsed before tier {} ({})", index + 1, name)));
            }

            let scratch = workspace.file(&format!("tier-{}-{}", index + 1, name));
            tokio::fs::create_dir_all(&scratch).await?;

            let _slot = self.pool.acquire(job.deadline.instant()).await.map_err(|e| match e {
                PoolError::Deadline => AppError::Timeout("no worker slot became free before the job deadline".to_string()),
                PoolError::Closed => AppError::Internal(e.to_string()),
            })?;

            let until = job.deadline.capped(tier.timeout);
            let ctx = TierContext {
                scratch: &scratch,
                language: hint,
                until,
            };
            info!(tier = index + 1, backend = name, "running transcription tier");

            // Backstop for tiers that do not enforce `until` themselves
            let outcome = match tokio::time::timeout_at(until, tier.backend.transcribe(&audio.path, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(TierError::TimedOut),
            }
            .and_then(|raw| {
                let segments = normalize::normalize(&raw, audio.duration_seconds, self.silence_tolerance)?;
                Ok((raw, segments))
            });

            match outcome {
                Ok((raw, segments)) => {
                    let detected_language = raw
                        .language
                        .as_deref()
                        .and_then(normalize::normalize_language)
                        .or_else(|| hint.map(str::to_string))
                        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());
                    info!(
                        tier = index + 1,
                        backend = name,
                        segments = segments.len(),
                        language = %detected_language,
                        "transcription tier succeeded"
                    );
                    return Ok(TranscriptResult {
                        segments,
                        detected_language,
                        duration_seconds: audio.duration_seconds,
                        tier: name.to_string(),
                    });
                }
                Err(TierError::TimedOut) if job.deadline.is_expired() => {
                    return Err(AppError::Timeout(format!(
                        "the job deadline elapsed during tier {} ({})",
                        index + 1,
                        name
                    )));
                }
                Err(e) => {
                    warn!(tier = index + 1, backend = name, error = %e, "transcription tier failed, escalating");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        Err(AppError::TranscriptionUnavailable(if failures.is_empty() {
            "no transcription tier is configured".to_string()
        } else {
            format!("every tier failed ({})", failures.join("; "))
        }))
    }
}
