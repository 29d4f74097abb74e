//! Transcription backend trait and types.

use crate::process::ProcessError;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::path::Path;
use tokio::time::Instant;

/// A contiguous span of transcript text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start_seconds: f64, end_seconds: f64, text: impl Into<String>) -> Self {
        Self {
            start_seconds,
            end_seconds,
            text: text.into(),
        }
    }
}

/// Raw output of one tier, before validation and clean-up.
#[derive(Debug, Clone, Default)]
pub struct BackendTranscript {
    pub segments: Vec<Segment>,
    /// Full text as reported by the tier, used when it has no timed segments
    pub text: Option<String>,
    /// Language code the tier detected or used
    pub language: Option<String>,
}

/// Everything a tier needs besides the audio path.
#[derive(Debug, Clone, Copy)]
pub struct TierContext<'a> {
    /// Private scratch directory inside the job workspace
    pub scratch: &'a Path,
    /// Language hint; `None` asks the tier to detect
    pub language: Option<&'a str>,
    /// The tier must be finished by then
    pub until: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend failed: {0}")]
    Failed(String),

    #[error("backend timed out")]
    TimedOut,

    #[error("malformed backend output: {0}")]
    Malformed(String),
}

impl From<ProcessError> for TierError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::TimedOut { .. } => TierError::TimedOut,
            ProcessError::NotFound { .. } | ProcessError::Spawn { .. } => TierError::Unavailable(err.to_string()),
            other => TierError::Failed(other.to_string()),
        }
    }
}

/// One interchangeable speech-to-text engine.
///
/// Implementations must leave nothing running once the returned future
/// completes or is dropped.
pub trait TranscriptionBackend: Send + Sync {
    /// Stable identifier, e.g. `whisper_cpp`
    fn name(&self) -> &'static str;

    /// Binary or endpoint, for health reporting
    fn target(&self) -> String;

    fn is_available(&self) -> bool;

    fn transcribe<'a>(
        &'a self,
        audio: &'a Path,
        ctx: TierContext<'a>,
    ) -> BoxFuture<'a, Result<BackendTranscript, TierError>>;
}

/// Read and parse a JSON file a tier left in its scratch directory.
pub(crate) async fn read_json_output<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, TierError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TierError::Malformed(format!("missing output {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TierError::Malformed(format!("invalid JSON in {}: {}", path.display(), e)))
}
