use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use garden_store::StoreError;
use serde::Serialize;

pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Where the client should navigate instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    /// The page an editor was working on no longer exists.
    PageGone(String),
    BadRequest(String),
    Unauthorized(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message, redirect) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            AppError::PageGone(msg) => (
                StatusCode::NOT_FOUND,
                "not_found",
                msg,
                Some(DASHBOARD_PATH.to_string()),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            AppError::InternalError(msg) => {
                tracing::error!("request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            redirect,
        });

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppError::NotFound(e.to_string()),
            StoreError::Backend(_) => AppError::InternalError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::InternalError(format!("{:#}", e))
    }
}
