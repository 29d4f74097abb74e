//! Remote URL endpoints.
//!
//! - `POST /transcribe-youtube` - `{url, language?}` → transcript JSON
//! - `POST /download-youtube` - `{url}` → the video itself as an MP4 attachment

use super::{attachment, TranscriptionResponse};
use crate::error::AppResult;
use crate::job::Language;
use crate::orchestrator::JobRequest;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

/// A missing `url` deserializes to an empty string and is reported by URL
/// validation as `invalid_input`, like any other bad URL.
#[derive(Debug, Deserialize)]
pub struct TranscribeUrlRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadUrlRequest {
    #[serde(default)]
    pub url: String,
}

pub async fn transcribe_youtube(
    state: web::Data<AppState>,
    body: web::Json<TranscribeUrlRequest>,
) -> AppResult<HttpResponse> {
    let TranscribeUrlRequest { url, language } = body.into_inner();
    let language: Language = language.as_deref().unwrap_or_default().parse()?;

    let outcome = state.orchestrator.run(JobRequest::remote(url, language)).await?;
    Ok(HttpResponse::Ok().json(TranscriptionResponse::from(&outcome)))
}

/// The body is streamed straight from the job workspace, which is released
/// once the stream is finished or dropped by a disconnecting client.
pub async fn download_youtube(
    state: web::Data<AppState>,
    body: web::Json<DownloadUrlRequest>,
) -> AppResult<HttpResponse> {
    let download = state.orchestrator.download_video(&body.url).await?;
    let disposition = attachment(&download.filename);
    let size = download.size;

    Ok(HttpResponse::Ok()
        .content_type("video/mp4")
        .insert_header(disposition)
        .no_chunking(size)
        .streaming(download.into_stream()))
}
