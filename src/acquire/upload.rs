//! Uploaded media intake.
//!
//! A multipart body is flattened into a stream of [`UploadPart`]s so that the
//! receiving side sees file metadata before any byte of content, can enforce
//! the size ceiling chunk by chunk, and accepts text fields on either side of
//! the file part.

use crate::error::{AppError, AppResult};
use crate::job::SourceKind;
use actix_multipart::{Field, Multipart};
use actix_web::web::Bytes;
use futures_util::stream::{self, LocalBoxStream};
use futures_util::{future, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Name of the multipart field that carries the media file.
pub const FILE_FIELD: &str = "file";

pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "ogg", "webm", "flac", "aac"];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v", "3gp", "ogv",
];

const AUDIO_MIME_EXTRA: &[&str] = &["video/webm", "application/ogg", "application/octet-stream"];
const VIDEO_MIME_EXTRA: &[&str] = &["application/octet-stream", "application/x-matroska"];

/// One event of an upload body, in arrival order.
#[derive(Debug)]
pub enum UploadPart {
    /// Headers of the file part; its content follows as `Chunk`s
    File {
        filename: Option<String>,
        content_type: Option<String>,
    },
    Chunk(Bytes),
    Text { name: String, value: String },
}

pub type UploadStream = LocalBoxStream<'static, AppResult<UploadPart>>;

/// An upload as handed to the Acquirer.
pub struct UploadSource {
    /// Request `Content-Length`, if the client sent one
    pub declared_length: Option<u64>,
    pub parts: UploadStream,
}

/// Text fields sent next to the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormFields {
    pub language: Option<String>,
    pub output_format: Option<String>,
}

impl FormFields {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "language" => self.language = Some(value),
            "output_format" => self.output_format = Some(value),
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }
}

#[derive(Debug)]
pub struct ReceivedUpload {
    pub path: PathBuf,
    pub filename: String,
    pub bytes: u64,
    pub fields: FormFields,
}

/// Flatten an actix multipart body into upload parts.
///
/// The file field is passed through chunk by chunk; every other field is
/// collected into a string of at most `max_field_bytes`.
pub fn multipart_parts(multipart: Multipart, max_field_bytes: usize) -> UploadStream {
    multipart
        .map(move |field| match field {
            Ok(field) => field_parts(field, max_field_bytes),
            Err(e) => stream::once(future::ready(Err(AppError::from(e)))).boxed_local(),
        })
        .flatten()
        .boxed_local()
}

fn field_parts(field: Field, max_field_bytes: usize) -> UploadStream {
    let name = field.name().unwrap_or_default().to_string();
    let filename = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(str::to_string);

    if name == FILE_FIELD || filename.is_some() {
        let header = UploadPart::File {
            filename,
            content_type: field.content_type().map(|m| m.essence_str().to_string()),
        };
        let chunks = field.map(|chunk| chunk.map(UploadPart::Chunk).map_err(AppError::from));
        return stream::once(future::ready(Ok(header))).chain(chunks).boxed_local();
    }

    let collected = async move {
        let mut field = field;
        let mut value = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if value.len() + chunk.len() > max_field_bytes {
                return Err(AppError::InvalidInput(format!("form field '{}' is too long", name)));
            }
            value.extend_from_slice(&chunk);
        }
        let value = String::from_utf8(value)
            .map_err(|_| AppError::InvalidInput(format!("form field '{}' is not valid UTF-8", name)))?;
        Ok(UploadPart::Text { name, value })
    };
    stream::once(collected).boxed_local()
}

fn extensions_for(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::AudioUpload => AUDIO_EXTENSIONS,
        SourceKind::VideoUpload | SourceKind::RemoteUrl => VIDEO_EXTENSIONS,
    }
}

/// Check the declared filename against the allow-list; returns the
/// normalized extension.
pub fn check_extension(kind: SourceKind, filename: &str) -> AppResult<String> {
    let allowed = extensions_for(kind);
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if allowed.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(AppError::UnsupportedFormat(format!(
            "'{}' is not an accepted {} file, use one of: .{}",
            filename,
            if kind == SourceKind::AudioUpload { "audio" } else { "video" },
            allowed.join(" .")
        )))
    }
}

/// Check the declared MIME type. An absent type is accepted, the extension
/// has already been validated.
pub fn check_mime(kind: SourceKind, content_type: Option<&str>) -> AppResult<()> {
    let Some(raw) = content_type else {
        return Ok(());
    };
    let essence = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    let accepted = match kind {
        SourceKind::AudioUpload => essence.starts_with("audio/") || AUDIO_MIME_EXTRA.contains(&essence.as_str()),
        SourceKind::VideoUpload | SourceKind::RemoteUrl => {
            essence.starts_with("video/") || VIDEO_MIME_EXTRA.contains(&essence.as_str())
        }
    };

    if accepted {
        Ok(())
    } else {
        Err(AppError::UnsupportedFormat(format!("content type '{}' is not accepted here", essence)))
    }
}

/// Stream the file part of `parts` into `dir`, enforcing `limit_bytes` on
/// every chunk, and collect the text fields.
pub async fn receive(
    kind: SourceKind,
    mut parts: UploadStream,
    dir: &Path,
    limit_bytes: u64,
) -> AppResult<ReceivedUpload> {
    let mut sink: Option<(tokio::fs::File, PathBuf, String)> = None;
    let mut bytes: u64 = 0;
    let mut fields = FormFields::default();

    while let Some(part) = parts.next().await {
        match part? {
            UploadPart::File { filename, content_type } => {
                if sink.is_some() {
                    return Err(AppError::InvalidInput("only one file per request is accepted".to_string()));
                }
                let filename = filename
                    .as_deref()
                    .and_then(|f| Path::new(f).file_name())
                    .and_then(|f| f.to_str())
                    .filter(|f| !f.trim().is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::InvalidInput("the uploaded file has no name".to_string()))?;

                let extension = check_extension(kind, &filename)?;
                check_mime(kind, content_type.as_deref())?;

                let path = dir.join(format!("source.{}", extension));
                let file = tokio::fs::File::create(&path).await?;
                debug!(filename = %filename, content_type = ?content_type, "receiving upload");
                sink = Some((file, path, filename));
            }
            UploadPart::Chunk(chunk) => {
                let Some((file, _, _)) = sink.as_mut() else {
                    continue;
                };
                bytes += chunk.len() as u64;
                if bytes > limit_bytes {
                    return Err(AppError::FileTooLarge { limit_bytes });
                }
                file.write_all(&chunk).await?;
            }
            UploadPart::Text { name, value } => fields.set(&name, value),
        }
    }

    let (mut file, path, filename) =
        sink.ok_or_else(|| AppError::InvalidInput(format!("multipart field '{}' is required", FILE_FIELD)))?;
    file.flush().await?;

    if bytes == 0 {
        return Err(AppError::InvalidInput("the uploaded file is empty".to_string()));
    }

    debug!(filename = %filename, bytes, "upload received");
    Ok(ReceivedUpload { path, filename, bytes, fields })
}
