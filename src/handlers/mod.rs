//! # HTTP Handlers
//!
//! Every route is registered by [`configure_routes`], which `main` mounts
//! both at the root and under `/api/v1`.
//!
//! ## Response shapes:
//! - `/transcribe-youtube`: `{transcription, duration, language, success}`
//! - `/transcribe-audio`, `/transcribe-video`: the same plus `output_format`
//!   and the uploaded `filename`
//! - `*/download` and `/download-youtube`: a file with
//!   `Content-Disposition: attachment`
//!
//! `transcription` holds the rendered transcript in the requested format.
//! Failures use the error body of [`crate::error::AppError`].

pub mod upload;
pub mod youtube;

use crate::error::AppError;
use crate::health;
use crate::job::OutputFormat;
use crate::orchestrator::JobOutcome;
use actix_web::http::header::{Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue};
use actix_web::web;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub transcription: String,
    /// Audio duration in seconds
    pub duration: f64,
    pub language: String,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadTranscriptionResponse {
    pub transcription: String,
    pub duration: f64,
    pub language: String,
    pub output_format: &'static str,
    pub filename: String,
    pub success: bool,
}

impl From<&JobOutcome> for TranscriptionResponse {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            transcription: outcome.output.content.clone(),
            duration: outcome.transcript.duration_seconds,
            language: outcome.transcript.detected_language.clone(),
            success: true,
        }
    }
}

impl From<&JobOutcome> for UploadTranscriptionResponse {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            transcription: outcome.output.content.clone(),
            duration: outcome.transcript.duration_seconds,
            language: outcome.transcript.detected_language.clone(),
            output_format: outcome.output.format.extension(),
            filename: outcome.filename.clone().unwrap_or_default(),
            success: true,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Malformed JSON bodies get the same error body as every other failure
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| AppError::InvalidInput(format!("invalid JSON body: {}", err)).into());

    cfg.app_data(json_config)
        .route("/health", web::get().to(health::health_check))
        .route("/transcribe-youtube", web::post().to(youtube::transcribe_youtube))
        .route("/download-youtube", web::post().to(youtube::download_youtube))
        .route("/transcribe-audio", web::post().to(upload::transcribe_audio))
        .route("/transcribe-audio/download", web::post().to(upload::transcribe_audio_download))
        .route("/transcribe-video", web::post().to(upload::transcribe_video))
        .route("/transcribe-video/download", web::post().to(upload::transcribe_video_download));
}

/// `transcription_<YYYYmmdd_HHMMSS>.<txt|srt>`
pub fn transcript_filename(format: OutputFormat) -> String {
    format!(
        "transcription_{}.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Attachment header carrying the filename twice: an ASCII fallback in
/// `filename` and the exact UTF-8 name in `filename*`.
pub fn attachment(filename: &str) -> ContentDisposition {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() && c != '"' { c } else { '_' })
        .collect();

    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![
            DispositionParam::Filename(ascii),
            DispositionParam::FilenameExt(ExtendedValue {
                charset: Charset::Ext("UTF-8".to_string()),
                language_tag: None,
                value: filename.as_bytes().to_vec(),
            }),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::tests::FakeDownloader;
    use crate::acquire::upload::AUDIO_EXTENSIONS;
    use crate::config::AppConfig;
    use crate::error::AcquisitionReason;
    use crate::middleware::MetricsMiddleware;
    use crate::orchestrator::tests::{cleanup, extraction_started, leftover_workspaces, test_config};
    use crate::orchestrator::Orchestrator;
    use crate::state::AppState;
    use crate::transcription::tests::{tier, FakeTier, Script};
    use crate::transcription::Tier;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    const BOUNDARY: &str = "transkriptor-test-boundary";

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .wrap(MetricsMiddleware)
                    .service(web::scope("/api/v1").configure(configure_routes))
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn state(config: &AppConfig, downloader: Arc<FakeDownloader>, tiers: Vec<Tier>) -> AppState {
        let orchestrator = Orchestrator::with_components(config, downloader, tiers).unwrap();
        AppState::new(config.clone(), orchestrator)
    }

    fn english() -> Vec<Tier> {
        vec![tier(
            FakeTier::speaking(Some("en"), &[(0.0, 3.0, "Hello there."), (3.0, 9.6, "General Kenobi.")]),
            Duration::from_secs(5),
        )]
    }

    /// Multipart body with the text fields first, then the file part.
    fn multipart(filename: &str, mime: Option<&str>, content: &[u8], fields: &[(&str, &str)]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        if let Some(mime) = mime {
            body.extend_from_slice(format!("Content-Type: {}\r\n", mime).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        (format!("multipart/form-data; boundary={}", BOUNDARY), body)
    }

    fn upload_request(path: &str, filename: &str, content: &[u8], fields: &[(&str, &str)]) -> test::TestRequest {
        let (content_type, body) = multipart(filename, None, content, fields);
        test::TestRequest::post()
            .uri(path)
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
    }

    fn attachment_name<B>(resp: &actix_web::dev::ServiceResponse<B>) -> String {
        let value = resp.headers().get(header::CONTENT_DISPOSITION).unwrap();
        ContentDisposition::from_raw(value)
            .unwrap()
            .get_filename_ext()
            .map(|ext| String::from_utf8(ext.value.clone()).unwrap())
            .unwrap()
    }

    #[actix_web::test]
    async fn test_audio_download_extension_matches_format() {
        let config = test_config("http-download");
        let state = state(&config, Arc::new(FakeDownloader::serving(b"")), english());
        let app = test_app!(state);

        for extension in AUDIO_EXTENSIONS {
            let req = upload_request(
                "/transcribe-audio/download",
                &format!("clip.{}", extension),
                b"pretend audio",
                &[("output_format", "srt")],
            );
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "extension {}", extension);
            assert!(attachment_name(&resp).ends_with(".srt"));

            let body = test::read_body(resp).await;
            let srt = String::from_utf8(body.to_vec()).unwrap();
            assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:03,000\nHello there.\n\n2\n"));
            assert!(srt.contains("--> 00:00:10,000\n"));
        }

        let req = upload_request("/transcribe-audio/download", "clip.wav", b"pretend audio", &[]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert!(attachment_name(&resp).ends_with(".txt"));
        assert_eq!(test::read_body(resp).await, "Hello there. General Kenobi.");

        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_unsupported_extension_is_rejected_early() {
        let config = test_config("http-exe");
        let downloader = Arc::new(FakeDownloader::serving(b""));
        let state = state(&config, downloader.clone(), english());
        let app = test_app!(state);

        let resp = test::call_service(&app, upload_request("/transcribe-audio", "setup.exe", b"MZ", &[]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "unsupported_format");

        // Video extensions are not audio
        let resp = test::call_service(&app, upload_request("/transcribe-audio", "movie.mkv", b"x", &[]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (content_type, body) = multipart("song.mp3", Some("image/png"), b"x", &[]);
        let req = test::TestRequest::post()
            .uri("/transcribe-audio")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
        assert!(!extraction_started(&config));
        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected_before_extraction() {
        let mut config = test_config("http-large");
        config.limits.max_audio_upload_bytes = 16;
        let first = FakeTier::speaking(Some("en"), &[]);
        let state = state(
            &config,
            Arc::new(FakeDownloader::serving(b"")),
            vec![tier(first.clone(), Duration::from_secs(5))],
        );
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            upload_request("/transcribe-audio", "long.mp3", &[0u8; 64], &[]).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "file_too_large");

        assert!(!extraction_started(&config));
        assert_eq!(first.calls(), 0);
        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_fallback_tier_populates_language() {
        let config = test_config("http-fallback");
        let first = FakeTier::new(Script::Fail);
        let second = FakeTier::speaking(Some("es"), &[(0.0, 10.0, "Hola a todos")]);
        let state = state(
            &config,
            Arc::new(FakeDownloader::serving(b"")),
            vec![
                tier(first.clone(), Duration::from_secs(5)),
                tier(second.clone(), Duration::from_secs(5)),
            ],
        );
        let app = test_app!(state);

        let req = upload_request("/api/v1/transcribe-video", "talk.mp4", b"pretend video", &[("language", "auto")]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["language"], "es");
        assert_eq!(body["transcription"], "Hola a todos");
        assert_eq!(body["output_format"], "txt");
        assert_eq!(body["filename"], "talk.mp4");
        assert_eq!(body["duration"], 10.0);
        assert_eq!((first.calls(), second.calls()), (1, 1));

        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_youtube_transcription_and_errors() {
        let config = test_config("http-youtube");
        let downloader = Arc::new(FakeDownloader::serving(b"\x00\x00\x00\x18ftypM4A pretend audio"));
        let state = state(&config, downloader.clone(), english());
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/transcribe-youtube")
            .set_json(serde_json::json!({ "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "language": "en" }));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["transcription"], "Hello there. General Kenobi.");
        assert_eq!(body["language"], "en");
        assert_eq!(body["success"], true);

        for payload in [
            serde_json::json!({ "url": "ftp://example.com/a.mp3" }),
            serde_json::json!({ "language": "en" }),
            serde_json::json!({ "url": "https://youtu.be/x", "language": "tlh" }),
        ] {
            let req = test::TestRequest::post().uri("/transcribe-youtube").set_json(payload);
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"]["kind"], "invalid_input");
        }

        let req = test::TestRequest::post()
            .uri("/transcribe-youtube")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json");
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_private_video_is_forbidden() {
        let config = test_config("http-private");
        let downloader = Arc::new(FakeDownloader::failing(AcquisitionReason::Private));
        let first = FakeTier::speaking(None, &[]);
        let state = state(&config, downloader, vec![tier(first.clone(), Duration::from_secs(5))]);
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/transcribe-youtube")
            .set_json(serde_json::json!({ "url": "https://www.youtube.com/watch?v=secret" }));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "acquisition_failed");
        assert_eq!(body["error"]["reason"], "private");

        assert!(!extraction_started(&config));
        assert_eq!(first.calls(), 0);
        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_deadline_is_gateway_timeout() {
        let mut config = test_config("http-deadline");
        config.pipeline.job_deadline_secs = 1;
        let state = state(
            &config,
            Arc::new(FakeDownloader::serving(b"")),
            vec![tier(FakeTier::new(Script::Hang), Duration::from_secs(30))],
        );
        let app = test_app!(state);

        let resp = test::call_service(&app, upload_request("/transcribe-audio", "a.wav", b"RIFF", &[]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "timeout");

        assert_eq!(leftover_workspaces(&config), 0);
        assert_eq!(state.orchestrator.counters().timed_out, 1);
        assert_eq!(state.orchestrator.pool().available(), state.orchestrator.pool().capacity());
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_download_youtube_streams_video() {
        let config = test_config("http-video");
        let video = b"\x00\x00\x00\x18ftypisom pretend merged video".to_vec();
        let state = state(&config, Arc::new(FakeDownloader::serving(&video)), english());
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/download-youtube")
            .set_json(serde_json::json!({ "url": "https://www.youtube.com/watch?v=abc" }));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(attachment_name(&resp), "Fake Title.mp4");

        let body = test::read_body(resp).await;
        assert_eq!(body.as_ref(), video.as_slice());
        assert_eq!(leftover_workspaces(&config), 0);
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_health_reports_jobs_and_tiers() {
        let config = test_config("http-health");
        let state = state(&config, Arc::new(FakeDownloader::serving(b"")), english());
        let app = test_app!(state);

        let resp = test::call_service(&app, upload_request("/transcribe-audio", "a.flac", b"fLaC", &[]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        for path in ["/health", "/api/v1/health"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(path).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: Value = test::read_body_json(resp).await;

            assert_eq!(body["status"], "healthy");
            assert_eq!(body["jobs"]["completed"], 1);
            assert_eq!(body["jobs"]["active"], 0);
            assert_eq!(body["workers"]["capacity"], 2);
            assert_eq!(body["workers"]["available"], 2);
            assert_eq!(body["tiers"][0]["kind"], "fake");
            assert_eq!(body["tiers"][0]["available"], true);
            assert_eq!(body["tools"]["ffmpeg"]["available"], true);
            assert!(body["metrics"]["total_requests"].as_u64().unwrap() >= 2);
        }
        cleanup(&config);
    }

    #[actix_web::test]
    async fn test_attachment_header_keeps_utf8_name() {
        let disposition = attachment("Canção \"ao vivo\".mp4");
        assert_eq!(disposition.get_filename(), Some("Can__o _ao vivo_.mp4"));
        let exact = disposition.get_filename_ext().unwrap();
        assert_eq!(String::from_utf8(exact.value.clone()).unwrap(), "Canção \"ao vivo\".mp4");

        let name = transcript_filename(OutputFormat::Subtitle);
        assert!(name.starts_with("transcription_") && name.ends_with(".srt"));
    }
}
