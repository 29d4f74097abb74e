//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/env data
//! - **Tagged enums**: `#[serde(tag = "kind")]` lets one TOML array hold different tier types
//! - **Result<T, E>**: Every loading and validation step can fail and says why
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__PORT, APP_PIPELINE__JOB_DEADLINE_SECS, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each pipeline component (acquisition limits, external tools, transcription
/// tiers) reads only its own section, so the groups map one-to-one onto the
/// components that consume them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub pipeline: PipelineConfig,
    pub tools: ToolsConfig,
    pub tiers: Vec<TierConfig>,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (containers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upload size ceilings, checked while the request body is still streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Ceiling for `/transcribe-audio` uploads (100 MiB by default)
    pub max_audio_upload_bytes: u64,
    /// Ceiling for `/transcribe-video` uploads (5 GiB by default)
    pub max_video_upload_bytes: u64,
    /// Ceiling for a single text field of a multipart form
    pub max_form_field_bytes: usize,
}

/// Job-level settings shared by every request.
///
/// ## Fields:
/// - `job_deadline_secs`: wall-clock budget for a whole job, queueing included
/// - `max_concurrent_jobs`: worker slots for heavy subprocess work (backpressure)
/// - `silence_tolerance_secs`: gaps wider than this are logged as long silences
///   when they are absorbed into the neighbouring segments
/// - `workspace_root`: parent directory of every per-job workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub job_deadline_secs: u64,
    pub max_concurrent_jobs: usize,
    pub silence_tolerance_secs: f64,
    pub workspace_root: PathBuf,
}

/// External binaries used for acquisition and extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub yt_dlp: String,
    pub download_timeout_secs: u64,
    pub extract_timeout_secs: u64,
}

/// One entry of the transcription fallback chain.
///
/// Order in the `tiers` array is the escalation order; it is never
/// rearranged at runtime.
///
/// ## TOML example:
/// ```toml
/// [[tiers]]
/// kind = "whisper_cpp"
/// binary = "whisper-cli"
/// model = "models/ggml-base.bin"
/// timeout_secs = 300
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierConfig {
    /// whisper.cpp command line (`whisper-cli` / legacy `main`)
    WhisperCpp {
        binary: String,
        model: PathBuf,
        #[serde(default)]
        threads: Option<u32>,
        timeout_secs: u64,
    },
    /// OpenAI's reference `whisper` Python CLI
    OpenaiWhisper {
        binary: String,
        model: String,
        #[serde(default)]
        threads: Option<u32>,
        timeout_secs: u64,
    },
    /// Any OpenAI-compatible `/v1/audio/transcriptions` endpoint
    RemoteApi {
        endpoint: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        timeout_secs: u64,
    },
}

impl TierConfig {
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            TierConfig::WhisperCpp { timeout_secs, .. }
            | TierConfig::OpenaiWhisper { timeout_secs, .. }
            | TierConfig::RemoteApi { timeout_secs, .. } => *timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Provides default configuration values.
///
/// The documented limits live here: 10 minute job deadline, 100 MiB audio
/// uploads, 5 GiB video uploads. Tiers default to whisper.cpp first and the
/// Python whisper CLI as the general-purpose fallback.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,                     // Port the web front-end expects
            },
            limits: LimitsConfig {
                max_audio_upload_bytes: 100 * MIB,
                max_video_upload_bytes: 5 * 1024 * MIB,
                max_form_field_bytes: 4096,
            },
            pipeline: PipelineConfig {
                job_deadline_secs: 600,
                max_concurrent_jobs: 4,
                silence_tolerance_secs: 1.0,
                workspace_root: env::temp_dir().join("transkriptor"),
            },
            tools: ToolsConfig {
                ffmpeg: "ffmpeg".to_string(),
                ffprobe: "ffprobe".to_string(),
                yt_dlp: "yt-dlp".to_string(),
                download_timeout_secs: 300,
                extract_timeout_secs: 300,
            },
            tiers: vec![
                TierConfig::WhisperCpp {
                    binary: "whisper-cli".to_string(),
                    model: PathBuf::from("models/ggml-base.bin"),
                    threads: None,
                    timeout_secs: 300,
                },
                TierConfig::OpenaiWhisper {
                    binary: "whisper".to_string(),
                    model: "small".to_string(),
                    threads: Some(4),
                    timeout_secs: 540,
                },
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PIPELINE__MAX_CONCURRENT_JOBS=8`: More worker slots
    /// - `APP_TOOLS__FFMPEG=/opt/ffmpeg/bin/ffmpeg`: Custom decoder location
    ///
    /// A double underscore separates nesting levels so that snake_case keys
    /// such as `job_deadline_secs` survive the mapping.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms commonly inject these without a prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one worker slot and one transcription tier
    /// - Non-zero upload ceilings
    /// - Every subprocess/tier timeout is strictly smaller than the job deadline,
    ///   so a single stage can never consume the whole budget
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.pipeline.job_deadline_secs == 0 {
            return Err(anyhow::anyhow!("Job deadline must be greater than 0"));
        }

        if !(self.pipeline.silence_tolerance_secs >= 0.0) {
            return Err(anyhow::anyhow!("Silence tolerance must be a non-negative number"));
        }

        if self.limits.max_audio_upload_bytes == 0 || self.limits.max_video_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size ceilings must be greater than 0"));
        }

        if self.limits.max_form_field_bytes == 0 {
            return Err(anyhow::anyhow!("Form field ceiling must be greater than 0"));
        }

        if self.tiers.is_empty() {
            return Err(anyhow::anyhow!("At least one transcription tier must be configured"));
        }

        let deadline = self.job_deadline();
        for (index, tier) in self.tiers.iter().enumerate() {
            if tier.timeout().is_zero() || tier.timeout() >= deadline {
                return Err(anyhow::anyhow!(
                    "Tier #{} timeout must be between 1s and the job deadline ({}s)",
                    index + 1,
                    self.pipeline.job_deadline_secs
                ));
            }
        }

        for (name, timeout) in [
            ("download", self.tools.download_timeout_secs),
            ("extract", self.tools.extract_timeout_secs),
        ] {
            if timeout == 0 || timeout >= self.pipeline.job_deadline_secs {
                return Err(anyhow::anyhow!(
                    "The {} timeout must be between 1s and the job deadline ({}s)",
                    name,
                    self.pipeline.job_deadline_secs
                ));
            }
        }

        Ok(())  // All validation passed
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline.job_deadline_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.download_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.extract_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// The documented defaults must be valid as shipped.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.job_deadline_secs, 600);
        assert_eq!(config.limits.max_audio_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.limits.max_video_upload_bytes, 5 * 1024 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tiers.clear();
        assert!(config.validate().is_err());
    }

    /// A tier may not be allowed to run as long as the whole job.
    #[test]
    fn test_tier_timeout_must_be_below_deadline() {
        let mut config = AppConfig::default();
        config.pipeline.job_deadline_secs = 300;
        assert!(config.validate().is_err());

        config.pipeline.job_deadline_secs = 900;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiers_deserialize_from_toml() {
        let source = r#"
            [[tiers]]
            kind = "whisper_cpp"
            binary = "/opt/whisper/main"
            model = "/opt/whisper/ggml-small.bin"
            timeout_secs = 120

            [[tiers]]
            kind = "remote_api"
            endpoint = "http://localhost:9000/v1/audio/transcriptions"
            model = "whisper-1"
            timeout_secs = 60
        "#;

        let parsed: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(parsed.tiers.len(), 2);
        assert!(matches!(parsed.tiers[0], TierConfig::WhisperCpp { threads: None, .. }));
        assert!(matches!(parsed.tiers[1], TierConfig::RemoteApi { api_key: None, .. }));
        assert_eq!(parsed.tiers[1].timeout(), Duration::from_secs(60));
    }
}
