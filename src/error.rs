//! Crate-wide error kinds and their HTTP surfacing (spec §7).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("infrastructure error: {0}")]
    Infra(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict => (StatusCode::CONFLICT, "conflict".to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            AppError::Infra(err) => {
                tracing::error!(error = %err, "infrastructure error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "temporarily unavailable".to_string(),
                )
            }
        };

        let status_label = if status == StatusCode::UNAUTHORIZED {
            "unauthorized"
        } else {
            "error"
        };

        (status, Json(json!({ "status": status_label, "error": error }))).into_response()
    }
}
