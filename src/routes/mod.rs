pub mod assets;
pub mod auth;
pub mod image;
pub mod project;
pub mod projects;
pub mod storage;

use askama::Template;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::notify::{clear_flash_cookie, Flash};
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Render a page; a notice that was shown is cleared so it appears once.
pub fn page<T: Template>(template: T, flash: &Flash) -> Response {
    let mut response = Html(template).into_response();
    if flash.0.is_some() {
        if let Ok(value) = HeaderValue::from_str(&clear_flash_cookie()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(projects::router())
        .merge(project::router())
        .merge(image::router())
        .merge(storage::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
