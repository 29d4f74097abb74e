//! Upload endpoints.
//!
//! Multipart form with a `file` part and optional `language` and
//! `output_format` fields:
//! - `POST /transcribe-audio`, `POST /transcribe-video` → transcript JSON
//! - `POST /transcribe-audio/download`, `POST /transcribe-video/download` →
//!   the rendered `.txt`/`.srt` file as an attachment

use super::{attachment, transcript_filename, UploadTranscriptionResponse};
use crate::acquire::upload::{multipart_parts, UploadSource};
use crate::error::AppResult;
use crate::job::SourceKind;
use crate::orchestrator::{JobOutcome, JobRequest};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

pub async fn transcribe_audio(state: web::Data<AppState>, req: HttpRequest, payload: Multipart) -> AppResult<HttpResponse> {
    let outcome = run_upload(&state, SourceKind::AudioUpload, &req, payload).await?;
    Ok(json_response(&outcome))
}

pub async fn transcribe_audio_download(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let outcome = run_upload(&state, SourceKind::AudioUpload, &req, payload).await?;
    Ok(file_response(outcome))
}

pub async fn transcribe_video(state: web::Data<AppState>, req: HttpRequest, payload: Multipart) -> AppResult<HttpResponse> {
    let outcome = run_upload(&state, SourceKind::VideoUpload, &req, payload).await?;
    Ok(json_response(&outcome))
}

pub async fn transcribe_video_download(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let outcome = run_upload(&state, SourceKind::VideoUpload, &req, payload).await?;
    Ok(file_response(outcome))
}

async fn run_upload(state: &AppState, kind: SourceKind, req: &HttpRequest, payload: Multipart) -> AppResult<JobOutcome> {
    let declared_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let upload = UploadSource {
        declared_length,
        parts: multipart_parts(payload, state.config.limits.max_form_field_bytes),
    };
    state.orchestrator.run(JobRequest::upload(kind, upload)).await
}

fn json_response(outcome: &JobOutcome) -> HttpResponse {
    HttpResponse::Ok().json(UploadTranscriptionResponse::from(outcome))
}

/// The rendered content is already in memory; the workspace copy was
/// removed with the workspace.
fn file_response(outcome: JobOutcome) -> HttpResponse {
    let format = outcome.output.format;
    HttpResponse::Ok()
        .content_type(format.content_type())
        .insert_header(attachment(&transcript_filename(format)))
        .body(outcome.output.content)
}
