//! Remote media download.
//!
//! [`MediaDownloader`] is the opaque "download media by URL" capability; the
//! production implementation drives `yt-dlp` through [`crate::process::run`],
//! so a deadline or a dropped request kills the download.

use crate::error::AcquisitionReason;
use crate::process::{self, ProcessError};
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

const MAX_TITLE_CHARS: usize = 200;

/// What the caller wants out of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaWanted {
    /// Best audio stream, any container; used for transcription
    Audio,
    /// Best video and audio merged into MP4; used for `/download-youtube`
    Video,
}

#[derive(Debug)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    /// Workspace directory the file must land in
    pub dir: &'a Path,
    /// File stem inside `dir`; the extension is chosen by the downloader
    pub stem: &'a str,
    pub wanted: MediaWanted,
    pub until: Instant,
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub title: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download failed ({reason}): {detail}")]
    Failed { reason: AcquisitionReason, detail: String },

    #[error("download did not finish in time")]
    TimedOut,

    #[error("downloader unavailable: {0}")]
    Unavailable(String),
}

/// Fetch remote media into a local directory.
pub trait MediaDownloader: Send + Sync {
    fn fetch<'a>(&'a self, request: DownloadRequest<'a>) -> BoxFuture<'a, Result<Downloaded, DownloadError>>;
}

/// `yt-dlp` command-line downloader.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: String,
    ffmpeg: String,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    fn command(&self, request: &DownloadRequest<'_>) -> Command {
        let template = request.dir.join(format!("{}.%(ext)s", request.stem));

        let mut command = Command::new(&self.binary);
        command
            .args(["--no-playlist", "--no-exec", "--quiet", "--no-warnings"])
            .args(["--print", "before_dl:title", "--print", "after_move:filepath"])
            .arg("--output")
            .arg(&template);

        match request.wanted {
            MediaWanted::Audio => {
                command.args(["--format", "bestaudio/best"]);
            }
            MediaWanted::Video => {
                command.args([
                    "--format",
                    "bestvideo[height>=1080]+bestaudio/bestvideo+bestaudio/best",
                    "--merge-output-format",
                    "mp4",
                ]);
            }
        }

        // A bare name is resolved through PATH by yt-dlp itself
        if Path::new(&self.ffmpeg).components().count() > 1 {
            command.arg("--ffmpeg-location").arg(&self.ffmpeg);
        }

        command.arg("--").arg(request.url);
        command
    }
}

impl MediaDownloader for YtDlpDownloader {
    fn fetch<'a>(&'a self, request: DownloadRequest<'a>) -> BoxFuture<'a, Result<Downloaded, DownloadError>> {
        Box::pin(async move {
            info!(url = %request.url, wanted = ?request.wanted, "downloading media");
            let output = process::run(self.command(&request), request.until)
                .await
                .map_err(DownloadError::from)?;

            let stdout = output.stdout_text();
            let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            let path = lines.last().map(PathBuf::from).ok_or_else(|| DownloadError::Failed {
                reason: AcquisitionReason::NetworkError,
                detail: "yt-dlp did not report a downloaded file".to_string(),
            })?;
            let title = if lines.len() >= 2 {
                lines.first().map(|t| t.to_string())
            } else {
                None
            };

            debug!(path = %path.display(), title = ?title, "media downloaded");
            Ok(Downloaded { path, title })
        })
    }
}

impl From<ProcessError> for DownloadError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::TimedOut { .. } => DownloadError::TimedOut,
            ProcessError::NotFound { .. } | ProcessError::Spawn { .. } => {
                DownloadError::Unavailable(err.to_string())
            }
            ProcessError::Failed { ref stderr, .. } => DownloadError::Failed {
                reason: classify_failure(stderr),
                detail: last_error_line(stderr),
            },
            ProcessError::Io { .. } => DownloadError::Failed {
                reason: AcquisitionReason::NetworkError,
                detail: err.to_string(),
            },
        }
    }
}

/// Map yt-dlp's stderr onto an acquisition reason.
///
/// Age gates are checked before the generic "sign in" test because YouTube
/// words them as "Sign in to confirm your age".
pub fn classify_failure(stderr: &str) -> AcquisitionReason {
    let text = stderr.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    // YouTube's throttling page asks to sign in too, but the video is not private
    if mentions(&["not a bot", "too many requests", "http error 429"]) {
        AcquisitionReason::NetworkError
    } else if mentions(&["confirm your age", "age-restricted", "age restricted", "inappropriate for some users"]) {
        AcquisitionReason::Restricted
    } else if mentions(&["private video", "video is private", "sign in", "login required", "log in", "members-only"]) {
        AcquisitionReason::Private
    } else if mentions(&[
        "403",
        "forbidden",
        "geo-restricted",
        "geo restriction",
        "not available in your country",
        "blocked it in your country",
    ]) {
        AcquisitionReason::Restricted
    } else if mentions(&[
        "404",
        "not found",
        "unsupported url",
        "not a valid url",
        "is not a valid url",
        "video unavailable",
        "incomplete youtube id",
    ]) {
        AcquisitionReason::InvalidUrl
    } else {
        AcquisitionReason::NetworkError
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("yt-dlp failed without output")
        .to_string()
}

/// Turn a video title into a safe download filename stem.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let capped = capped.trim();

    if capped.is_empty() {
        "video".to_string()
    } else {
        capped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Private video. Sign in if you've been granted access"),
            AcquisitionReason::Private
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Sign in to confirm your age"),
            AcquisitionReason::Restricted
        );
        assert_eq!(
            classify_failure("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            AcquisitionReason::Restricted
        );
        assert_eq!(
            classify_failure("ERROR: Unsupported URL: https://example.com/"),
            AcquisitionReason::InvalidUrl
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            AcquisitionReason::InvalidUrl
        );
        assert_eq!(
            classify_failure("ERROR: Unable to download webpage: <urlopen error [Errno -3]>"),
            AcquisitionReason::NetworkError
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser"),
            AcquisitionReason::NetworkError
        );
    }

    #[test]
    fn test_failed_process_maps_to_reason() {
        let err = DownloadError::from(ProcessError::Failed {
            program: "yt-dlp".into(),
            status: std::os::unix::process::ExitStatusExt::from_raw(256),
            stderr: "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Private video".into(),
        });
        match err {
            DownloadError::Failed { reason, detail } => {
                assert_eq!(reason, AcquisitionReason::Private);
                assert_eq!(detail, "ERROR: [youtube] abc: Private video");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My: \"Great\" Video?"), "My Great Video");
        assert_eq!(sanitize_title("a/b\\c|d*e<f>g"), "abcdefg");
        assert_eq!(sanitize_title("tab\tand\nnewline"), "tab and newline");
        assert_eq!(sanitize_title("  ???  "), "video");
        assert_eq!(sanitize_title(&"x".repeat(500)).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_command_arguments() {
        let dir = std::env::temp_dir();
        let downloader = YtDlpDownloader::new("yt-dlp", "/opt/ffmpeg/bin/ffmpeg");
        let request = DownloadRequest {
            url: "https://www.youtube.com/watch?v=abc",
            dir: &dir,
            stem: "source",
            wanted: MediaWanted::Video,
            until: Instant::now(),
        };
        let command = downloader.command(&request);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--no-exec".to_string()));
        assert!(args.contains(&"mp4".to_string()));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }
}
