use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    /// Input rejected before any backend call was made.
    #[error("{0}")]
    BadRequest(String),

    /// A backend call failed; the message is the service's own.
    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => return Redirect::to("/auth").into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Backend(e) => {
                tracing::error!("Backend error: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
