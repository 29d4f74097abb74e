//! # Job Model
//!
//! One transcription request from intake to a terminal state.
//!
//! ## State Machine:
//! `created → acquiring → extracting → transcribing → formatting → done`,
//! and any non-terminal state may move to `failed`. A video download ends
//! after acquisition and goes `acquiring → done`.
//!
//! Only [`Job::advance`] (to the successor of the current state),
//! [`Job::hand_off`] and [`Job::fail`] change the state, so a stage can
//! neither be skipped nor re-entered.

use crate::error::{AppError, AppResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Unique job identifier, assigned at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the media of a job comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    RemoteUrl,
    AudioUpload,
    VideoUpload,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::RemoteUrl => "remote_url",
            SourceKind::AudioUpload => "audio_upload",
            SourceKind::VideoUpload => "video_upload",
        }
    }
}

/// Languages accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Auto,
    Portuguese,
    English,
    Spanish,
    French,
    German,
    Italian,
}

impl Language {
    /// ISO 639-1 code passed to the tiers, `None` for auto-detection.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Language::Auto => None,
            Language::Portuguese => Some("pt"),
            Language::English => Some("en"),
            Language::Spanish => Some("es"),
            Language::French => Some("fr"),
            Language::German => Some("de"),
            Language::Italian => Some("it"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.code().unwrap_or("auto")
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Auto
    }
}

impl FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Language::Auto),
            "pt" => Ok(Language::Portuguese),
            "en" => Ok(Language::English),
            "es" => Ok(Language::Spanish),
            "fr" => Ok(Language::French),
            "de" => Ok(Language::German),
            "it" => Ok(Language::Italian),
            other => Err(AppError::InvalidInput(format!(
                "unsupported language '{}', use one of: auto, pt, en, es, fr, de, it",
                other
            ))),
        }
    }
}

/// Requested rendering of the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    PlainText,
    Subtitle,
}

impl OutputFormat {
    /// Value used on the wire (`txt` / `srt`), which is also the file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::PlainText => "txt",
            OutputFormat::Subtitle => "srt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::PlainText => "text/plain; charset=utf-8",
            OutputFormat::Subtitle => "application/x-subrip; charset=utf-8",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::PlainText
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "txt" => Ok(OutputFormat::PlainText),
            "srt" => Ok(OutputFormat::Subtitle),
            other => Err(AppError::InvalidInput(format!(
                "output_format must be 'txt' or 'srt', got '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Acquiring,
    Extracting,
    Transcribing,
    Formatting,
    Done,
    Failed,
}

impl JobState {
    /// The only state a successful stage may lead to.
    fn successor(self) -> Option<JobState> {
        match self {
            JobState::Created => Some(JobState::Acquiring),
            JobState::Acquiring => Some(JobState::Extracting),
            JobState::Extracting => Some(JobState::Transcribing),
            JobState::Transcribing => Some(JobState::Formatting),
            JobState::Formatting => Some(JobState::Done),
            JobState::Done | JobState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Acquiring => "acquiring",
            JobState::Extracting => "extracting",
            JobState::Transcribing => "transcribing",
            JobState::Formatting => "formatting",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

/// Absolute point in time after which a job must abort.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// The earlier of this deadline and `now + limit`; used for per-stage budgets.
    pub fn capped(&self, limit: Duration) -> Instant {
        self.at.min(Instant::now() + limit)
    }
}

/// One transcription request.
///
/// The workspace is not stored here: it is a guard owned by the orchestrator
/// for exactly as long as the job runs.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub source_kind: SourceKind,
    pub requested_language: Language,
    pub output_format: OutputFormat,
    pub deadline: Deadline,
    state: JobState,
}

impl Job {
    pub fn new(
        source_kind: SourceKind,
        requested_language: Language,
        output_format: OutputFormat,
        budget: Duration,
    ) -> Self {
        Self {
            id: JobId::new(),
            source_kind,
            requested_language,
            output_format,
            deadline: Deadline::after(budget),
            state: JobState::Created,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to the next stage.
    pub fn advance(&mut self) -> AppResult<JobState> {
        let next = self.state.successor().ok_or_else(|| {
            AppError::Internal(format!("job {} cannot advance from '{}'", self.id, self.state.as_str()))
        })?;
        tracing::debug!(job_id = %self.id, from = self.state.as_str(), to = next.as_str(), "job state");
        self.state = next;
        Ok(next)
    }

    /// Finish a job whose only stage is acquisition, once the result has been
    /// handed to the caller.
    pub fn hand_off(&mut self) -> AppResult<JobState> {
        if self.state != JobState::Acquiring {
            return Err(AppError::Internal(format!(
                "job {} cannot be handed off from '{}'",
                self.id,
                self.state.as_str()
            )));
        }
        tracing::debug!(job_id = %self.id, from = self.state.as_str(), to = "done", "job state");
        self.state = JobState::Done;
        Ok(JobState::Done)
    }

    /// Move to `failed`. A job that already reached a terminal state keeps it.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(job_id = %self.id, from = self.state.as_str(), "job failed");
            self.state = JobState::Failed;
        }
    }
}
