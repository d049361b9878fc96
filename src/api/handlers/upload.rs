use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::UploadConfig,
    error::{AppError, AppResult},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub file: UploadedFile,
}

/// Accept a chat attachment in the multipart field `file`.
///
/// The file is validated and measured but not stored; the returned URL is
/// where it would be served from.
pub async fn upload_attachment(
    State(state): State<AppState>,
    WithRejection(mut multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<UploadResponse>> {
    let limits = &state.config.upload;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::UploadRejected("No file uploaded".to_string()))?;
        let extension = allowed_extension(&name, limits)?;
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            size += chunk.len();
            if size > limits.max_bytes {
                return Err(too_large(limits));
            }
        }

        let url = format!(
            "{}/{}.{}",
            limits.public_base_url.trim_end_matches('/'),
            Uuid::new_v4(),
            extension
        );
        tracing::info!("Accepted upload {} ({} bytes, {})", name, size, mime_type);

        return Ok(Json(UploadResponse {
            ok: true,
            file: UploadedFile {
                url,
                mime_type,
                name,
                size,
            },
        }));
    }

    Err(AppError::UploadRejected("No file uploaded".to_string()))
}

/// Lowercased extension of `file_name` if the upload policy allows it.
pub fn allowed_extension(file_name: &str, limits: &UploadConfig) -> AppResult<String> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| limits.allowed_extensions.iter().any(|allowed| allowed == ext));

    extension.ok_or_else(|| {
        AppError::UploadRejected("Only image and document files are allowed!".to_string())
    })
}

fn too_large(limits: &UploadConfig) -> AppError {
    AppError::UploadRejected(format!(
        "File exceeds the {} byte limit",
        limits.max_bytes
    ))
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::UploadRejected("File is too large".to_string())
    } else {
        AppError::BadRequest(err.body_text())
    }
}
