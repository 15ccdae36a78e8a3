use crate::services::runner::{RunError, display_code};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Parse(String),

    #[error("No file uploaded")]
    NoFile,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("failed to launch encoder: {0}")]
    Launch(#[source] std::io::Error),

    #[error("ffmpeg exited {}\n{stderr}", display_code(.code))]
    Encoding { code: Option<i32>, stderr: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Launch(e) => AppError::Launch(e),
            RunError::Encoding { code, stderr } => AppError::Encoding { code, stderr },
            RunError::Io(e) => AppError::Internal(format!("Encoder I/O error: {}", e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Parse(_) | AppError::NoFile => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Launch(_) | AppError::Encoding { .. } | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::METHOD_NOT_ALLOWED {
            return (status, self.to_string()).into_response();
        }

        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!("Conversion failed: {}", message);
        } else {
            tracing::warn!("Rejected upload: {}", message);
        }

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
