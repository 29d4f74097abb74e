//! OpenAI-compatible transcription API backend.
//!
//! POSTs the normalized audio to a full endpoint URL such as
//! `http://localhost:9000/v1/audio/transcriptions`, asking for `verbose_json`
//! so that timed segments come back.

use super::backend::{BackendTranscript, Segment, TierContext, TierError, TranscriptionBackend};
use futures_util::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use tokio::time::Instant;

pub struct RemoteApiBackend {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VerboseJson {
    text: Option<String>,
    language: Option<String>,
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
}

impl RemoteApiBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }
}

impl TranscriptionBackend for RemoteApiBackend {
    fn name(&self) -> &'static str {
        "remote_api"
    }

    fn target(&self) -> String {
        format!("{} (model {})", self.endpoint, self.model)
    }

    fn is_available(&self) -> bool {
        Url::parse(&self.endpoint).is_ok()
    }

    fn transcribe<'a>(
        &'a self,
        audio: &'a Path,
        ctx: TierContext<'a>,
    ) -> BoxFuture<'a, Result<BackendTranscript, TierError>> {
        Box::pin(async move {
            let bytes = tokio::fs::read(audio)
                .await
                .map_err(|e| TierError::Failed(format!("cannot read {}: {}", audio.display(), e)))?;
            let file_name = audio
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("audio.wav")
                .to_string();

            let part = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("audio/wav")
                .map_err(|e| TierError::Failed(e.to_string()))?;
            let mut form = Form::new()
                .part("file", part)
                .text("model", self.model.clone())
                .text("response_format", "verbose_json");
            if let Some(language) = ctx.language {
                form = form.text("language", language.to_string());
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .multipart(form)
                .timeout(ctx.until.saturating_duration_since(Instant::now()));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await.map_err(map_reqwest)?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(TierError::Failed(format!("API error {}: {}", status, body.trim())));
            }

            let json: VerboseJson = response
                .json()
                .await
                .map_err(|e| TierError::Malformed(e.to_string()))?;
            Ok(parse(json))
        })
    }
}

fn map_reqwest(err: reqwest::Error) -> TierError {
    if err.is_timeout() {
        TierError::TimedOut
    } else if err.is_connect() {
        TierError::Unavailable(err.to_string())
    } else {
        TierError::Failed(err.to_string())
    }
}

fn parse(json: VerboseJson) -> BackendTranscript {
    BackendTranscript {
        segments: json
            .segments
            .into_iter()
            .map(|s| Segment::new(s.start, s.end, s.text))
            .collect(),
        text: json.text,
        language: json.language,
    }
}
