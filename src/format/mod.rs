//! # Formatter
//!
//! Renders a [`TranscriptResult`] as plain text or SubRip subtitles and writes
//! it into the job workspace. Segments are rendered exactly in the order the
//! Transcriber produced them; nothing is reordered or merged here.

pub mod srt;
pub mod text;

use crate::error::AppResult;
use crate::job::OutputFormat;
use crate::transcription::TranscriptResult;
use crate::workspace::Workspace;
use std::path::PathBuf;

/// Base name of the rendered file inside a workspace.
pub const OUTPUT_STEM: &str = "transcript";

#[derive(Debug, Clone)]
pub struct FormattedOutput {
    pub path: PathBuf,
    pub content: String,
    pub format: OutputFormat,
}

pub fn render(result: &TranscriptResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::PlainText => text::render(&result.segments),
        OutputFormat::Subtitle => srt::render(&result.segments),
    }
}

/// `format(result, output_format) -> output_path`
pub async fn format(result: &TranscriptResult, format: OutputFormat, workspace: &Workspace) -> AppResult<FormattedOutput> {
    let content = render(result, format);
    let path = workspace.file(&format!("{}.{}", OUTPUT_STEM, format.extension()));
    tokio::fs::write(&path, content.as_bytes()).await?;
    Ok(FormattedOutput { path, content, format })
}
