//! # Error Handling
//!
//! This module defines the external error taxonomy of the service and how each
//! kind is converted to an HTTP response.
//!
//! ## Error Kinds:
//! - **InvalidInput**: missing or malformed URL/field (400)
//! - **UnsupportedFormat**: extension or MIME type outside the allow-list (415)
//! - **FileTooLarge**: upload exceeds the configured ceiling (413)
//! - **AcquisitionFailed**: download failed: invalid URL, network, geo/age restriction, private video
//! - **ExtractionFailed**: no decodable audio in the input (422)
//! - **TranscriptionUnavailable**: every transcription tier failed (503)
//! - **Timeout**: the job deadline elapsed (504)
//! - **Internal**: anything unexpected (500)
//!
//! Component modules keep their own `thiserror` enums; they are mapped onto
//! these kinds by the orchestrator, so a client only ever sees a stable `kind`
//! string plus a human-readable message.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Why a remote download could not be turned into a local media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionReason {
    InvalidUrl,
    NetworkError,
    Restricted,
    Private,
}

impl AcquisitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionReason::InvalidUrl => "invalid_url",
            AcquisitionReason::NetworkError => "network_error",
            AcquisitionReason::Restricted => "restricted",
            AcquisitionReason::Private => "private",
        }
    }
}

impl fmt::Display for AcquisitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why normalization to 16 kHz mono PCM failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionReason {
    UnreadableContainer,
    ZeroDuration,
    DecodeError,
}

impl ExtractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionReason::UnreadableContainer => "unreadable_container",
            ExtractionReason::ZeroDuration => "zero_duration",
            ExtractionReason::DecodeError => "decode_error",
        }
    }
}

impl fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::InvalidInput("url is required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Client sent a missing or malformed field
    InvalidInput(String),

    /// Upload extension or MIME type is not accepted for this endpoint
    UnsupportedFormat(String),

    /// Upload exceeded the configured ceiling
    FileTooLarge { limit_bytes: u64 },

    /// Remote media could not be downloaded
    AcquisitionFailed { reason: AcquisitionReason, detail: String },

    /// The input has no decodable audio
    ExtractionFailed { reason: ExtractionReason, detail: String },

    /// Every transcription tier failed for this job
    TranscriptionUnavailable(String),

    /// The job deadline elapsed
    Timeout(String),

    /// Unexpected server-side failure
    Internal(String),
}

impl AppError {
    /// Stable, machine-readable kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::FileTooLarge { .. } => "file_too_large",
            AppError::AcquisitionFailed { .. } => "acquisition_failed",
            AppError::ExtractionFailed { .. } => "extraction_failed",
            AppError::TranscriptionUnavailable(_) => "transcription_unavailable",
            AppError::Timeout(_) => "timeout",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Sub-reason for the two failure kinds that carry one.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            AppError::AcquisitionFailed { reason, .. } => Some(reason.as_str()),
            AppError::ExtractionFailed { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Validation errors are raised before any subprocess is started.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_) | AppError::UnsupportedFormat(_) | AppError::FileTooLarge { .. }
        )
    }
}

/// Human-readable rendering, also used in logs.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            AppError::FileTooLarge { limit_bytes } => write!(
                f,
                "File too large: the limit is {} MB",
                limit_bytes / (1024 * 1024)
            ),
            AppError::AcquisitionFailed { reason, detail } => {
                write!(f, "Acquisition failed ({}): {}", reason, detail)
            }
            AppError::ExtractionFailed { reason, detail } => {
                write!(f, "Extraction failed ({}): {}", reason, detail)
            }
            AppError::TranscriptionUnavailable(msg) => {
                write!(f, "Transcription unavailable: {}", msg)
            }
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "success": false,
///   "error": {
///     "kind": "acquisition_failed",
///     "reason": "private",
///     "message": "Acquisition failed (private): video is private",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AcquisitionFailed { reason, .. } => match reason {
                AcquisitionReason::InvalidUrl => StatusCode::BAD_REQUEST,
                AcquisitionReason::Restricted | AcquisitionReason::Private => StatusCode::FORBIDDEN,
                AcquisitionReason::NetworkError => StatusCode::BAD_GATEWAY,
            },
            AppError::ExtractionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TranscriptionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let Some(reason) = self.reason() {
            error["reason"] = json!(reason);
        }

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": error
        }))
    }
}

/// Startup and configuration helpers return `anyhow::Error`; anything that
/// escapes into a request is unexpected by definition.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::InvalidInput(format!("malformed multipart body: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
