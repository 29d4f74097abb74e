//! whisper.cpp command-line backend (`whisper-cli`, formerly `main`).

use super::backend::{read_json_output, BackendTranscript, Segment, TierContext, TierError, TranscriptionBackend};
use crate::process;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Output base name; whisper.cpp appends `.json`.
const OUTPUT_STEM: &str = "transcript";

pub struct WhisperCppBackend {
    binary: String,
    model: PathBuf,
    threads: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CppOutput {
    result: Option<CppResult>,
    #[serde(default)]
    transcription: Vec<CppSegment>,
}

#[derive(Debug, Deserialize)]
struct CppResult {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CppSegment {
    offsets: CppOffsets,
    text: String,
}

/// Milliseconds
#[derive(Debug, Deserialize)]
struct CppOffsets {
    from: u64,
    to: u64,
}

impl WhisperCppBackend {
    pub fn new(binary: impl Into<String>, model: impl Into<PathBuf>, threads: Option<u32>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            threads,
        }
    }

    fn command(&self, audio: &Path, ctx: &TierContext<'_>) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(audio)
            .arg("-oj")
            .arg("-of")
            .arg(ctx.scratch.join(OUTPUT_STEM))
            // whisper.cpp assumes English unless told otherwise
            .arg("-l")
            .arg(ctx.language.unwrap_or("auto"));
        if let Some(threads) = self.threads {
            command.arg("-t").arg(threads.to_string());
        }
        command
    }
}

impl TranscriptionBackend for WhisperCppBackend {
    fn name(&self) -> &'static str {
        "whisper_cpp"
    }

    fn target(&self) -> String {
        format!("{} ({})", self.binary, self.model.display())
    }

    fn is_available(&self) -> bool {
        process::resolve_program(&self.binary).is_some() && self.model.is_file()
    }

    fn transcribe<'a>(
        &'a self,
        audio: &'a Path,
        ctx: TierContext<'a>,
    ) -> BoxFuture<'a, Result<BackendTranscript, TierError>> {
        Box::pin(async move {
            if !self.model.is_file() {
                return Err(TierError::Unavailable(format!("model not found: {}", self.model.display())));
            }
            process::run(self.command(audio, &ctx), ctx.until).await?;

            let output: CppOutput = read_json_output(&ctx.scratch.join(format!("{}.json", OUTPUT_STEM))).await?;
            Ok(parse(output))
        })
    }
}

fn parse(output: CppOutput) -> BackendTranscript {
    let segments = output
        .transcription
        .into_iter()
        .map(|s| Segment::new(s.offsets.from as f64 / 1000.0, s.offsets.to as f64 / 1000.0, s.text))
        .collect();
    BackendTranscript {
        segments,
        text: None,
        language: output.result.and_then(|r| r.language),
    }
}
