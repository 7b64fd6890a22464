use crate::error::BgRemovalError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Internal Server Error: {0}")]
    Internal(#[from] BgRemovalError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(name) => (StatusCode::NOT_FOUND, format!("{name} not found")),
            AppError::Multipart(e) => {
                tracing::warn!("Rejected multipart body: {}", e.body_text());
                (e.status(), e.body_text())
            },
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            },
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
