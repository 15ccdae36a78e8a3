use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload::first_file;
use axum::{
    body::Body,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use utoipa::ToSchema;

/// Multipart form accepted by the convert endpoint
#[derive(ToSchema)]
pub struct ConvertForm {
    /// Video to convert. Only the first file part is used.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// `attachment` disposition for `filename`, with an RFC 5987 `filename*`
/// when the name cannot be sent as-is in a quoted string
pub fn content_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect::<String>();

    if ascii_filename == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback_filename = if ascii_filename.is_empty() {
        "video-h265.mp4"
    } else {
        &ascii_filename
    };
    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

#[utoipa::path(
    post,
    path = "/api/convert",
    request_body(content = ConvertForm, content_type = "multipart/form-data", description = "Video upload"),
    responses(
        (status = 200, description = "Converted H.265/AAC MP4 stream (video/mp4)"),
        (status = 400, description = "Malformed, oversized or missing upload", body = ErrorResponse),
        (status = 405, description = "Method other than POST"),
        (status = 500, description = "Encoder could not be launched or failed", body = ErrorResponse)
    ),
    tag = "convert"
)]
pub async fn convert_video(
    State(state): State<AppState>,
    method: Method,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    if method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    // 1. Ingest the upload into a temp file
    let multipart = multipart.map_err(|e| AppError::Parse(e.body_text()))?;
    let files = state.ingestor.ingest(multipart).await?;
    let upload = first_file(files)?;

    // 2. Encode; temp files are removed on failure
    let video = state.conversion.convert(upload).await?;

    // 3. Stream the result; temp files are removed when the body is dropped
    let content_disposition = content_disposition(video.download_name());
    let content_length = video.len();
    let body = Body::from_stream(video.into_body_stream());

    let mut response = (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition),
        ],
        body,
    )
        .into_response();

    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));

    Ok(response)
}
