//! OpenAI's reference `whisper` Python CLI.

use super::backend::{read_json_output, BackendTranscript, Segment, TierContext, TierError, TranscriptionBackend};
use crate::process;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

pub struct OpenAiWhisperBackend {
    binary: String,
    model: String,
    threads: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl OpenAiWhisperBackend {
    pub fn new(binary: impl Into<String>, model: impl Into<String>, threads: Option<u32>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            threads,
        }
    }

    fn command(&self, audio: &Path, ctx: &TierContext<'_>) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(audio)
            .args(["--model", &self.model])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(ctx.scratch)
            .args(["--fp16", "False", "--verbose", "False"]);
        if let Some(threads) = self.threads {
            command.arg("--threads").arg(threads.to_string());
        }
        if let Some(language) = ctx.language {
            command.args(["--language", language]);
        }
        command
    }
}

impl TranscriptionBackend for OpenAiWhisperBackend {
    fn name(&self) -> &'static str {
        "openai_whisper"
    }

    fn target(&self) -> String {
        format!("{} (model {})", self.binary, self.model)
    }

    fn is_available(&self) -> bool {
        process::resolve_program(&self.binary).is_some()
    }

    fn transcribe<'a>(
        &'a self,
        audio: &'a Path,
        ctx: TierContext<'a>,
    ) -> BoxFuture<'a, Result<BackendTranscript, TierError>> {
        Box::pin(async move {
            process::run(self.command(audio, &ctx), ctx.until).await?;

            // The CLI names its output after the input file
            let stem = audio
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| TierError::Failed(format!("unusable audio path {}", audio.display())))?;
            let output: WhisperOutput = read_json_output(&ctx.scratch.join(format!("{}.json", stem))).await?;
            Ok(parse(output))
        })
    }
}

fn parse(output: WhisperOutput) -> BackendTranscript {
    BackendTranscript {
        segments: output
            .segments
            .into_iter()
            .map(|s| Segment::new(s.start, s.end, s.text))
            .collect(),
        text: output.text,
        language: output.language,
    }
}
