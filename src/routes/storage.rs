use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/storage/{bucket}/{*path}", get(serve))
}

/// Public blob URLs of the local backend resolve here. Like a public bucket,
/// no session is needed.
async fn serve(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> AppResult<Response> {
    let malformed = path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if malformed || bucket != state.backend.blobs.bucket() {
        return Err(AppError::NotFound);
    }
    let data = state
        .backend
        .blobs
        .download(&path)
        .await?
        .ok_or(AppError::NotFound)?;

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        data,
    )
        .into_response())
}
