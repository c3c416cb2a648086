use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::backend::SignUpOutcome;
use crate::extractors::{clear_session_cookie, session_cookie, MaybeSession, RequireSession};
use crate::notify::{Flash, Notice, Redirect};
use crate::routes::page;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/auth.html")]
struct AuthTemplate {
    notice: Option<Notice>,
    signed_in: bool,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct ConfirmQuery {
    #[serde(default)]
    token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth", get(auth_page))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/confirm", get(confirm))
}

async fn auth_page(MaybeSession(session): MaybeSession, flash: Flash) -> Response {
    if session.is_some() {
        return Redirect::to("/").into_response();
    }
    let template = AuthTemplate {
        notice: flash.0.clone(),
        signed_in: false,
    };
    page(template, &flash)
}

async fn sign_in(State(state): State<AppState>, Form(form): Form<Credentials>) -> Redirect {
    match state.backend.auth.sign_in(form.email.trim(), &form.password).await {
        Ok(session) => {
            let auth = &state.config.auth;
            Redirect::to("/").cookie(session_cookie(
                &auth.cookie_name,
                &session.access_token,
                auth.session_hours,
            ))
        }
        Err(e) => {
            tracing::warn!("Sign-in failed: {}", e);
            Redirect::to("/auth").error(e.to_string())
        }
    }
}

async fn sign_up(State(state): State<AppState>, Form(form): Form<Credentials>) -> Redirect {
    match state.backend.auth.sign_up(form.email.trim(), &form.password).await {
        Ok(SignUpOutcome::ConfirmationRequired) => {
            Redirect::to("/auth").success("Check your email for the confirmation link!")
        }
        Ok(SignUpOutcome::Active) => {
            Redirect::to("/auth").success("Account created! You can sign in now.")
        }
        Err(e) => {
            tracing::warn!("Sign-up failed: {}", e);
            Redirect::to("/auth").error(e.to_string())
        }
    }
}

/// Sign out, or stay on the current page with the error shown.
async fn sign_out(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    headers: HeaderMap,
) -> Redirect {
    match state.backend.auth.sign_out(&session).await {
        Ok(()) => Redirect::to("/auth").cookie(clear_session_cookie(&state.config.auth.cookie_name)),
        Err(e) => {
            tracing::warn!(user_id = %session.user.id, "Sign-out failed: {}", e);
            Redirect::to(referring_path(&headers)).error(e.to_string())
        }
    }
}

async fn confirm(State(state): State<AppState>, Query(query): Query<ConfirmQuery>) -> Redirect {
    match state.backend.auth.confirm_email(&query.token).await {
        Ok(()) => Redirect::to("/auth").success("Email confirmed! You can sign in now."),
        Err(e) => Redirect::to("/auth").error(e.to_string()),
    }
}

/// Path (and query) of the page that submitted the form; `/` when unknown.
/// Leading slashes collapse to one so the result never reads as
/// protocol-relative.
fn referring_path(headers: &HeaderMap) -> String {
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| url::Url::parse(v).ok())
        .map(|url| {
            let path = format!("/{}", url.path().trim_start_matches('/'));
            match url.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path,
            }
        })
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn referring_path_keeps_path_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("http://localhost:3000/image/abc?pin=p1"),
        );
        assert_eq!(referring_path(&headers), "/image/abc?pin=p1");
    }

    #[test]
    fn referring_path_never_leaves_the_site() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("http://localhost:3000//evil.example/x"),
        );
        assert_eq!(referring_path(&headers), "/evil.example/x");

        headers.insert(
            header::REFERER,
            HeaderValue::from_static("http://localhost:3000/\\\\evil.example/x?a=1"),
        );
        assert_eq!(referring_path(&headers), "/evil.example/x?a=1");
    }

    #[test]
    fn missing_referer_goes_home() {
        assert_eq!(referring_path(&HeaderMap::new()), "/");
    }
}
