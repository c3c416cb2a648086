use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::backend::Session;
use crate::error::AppError;
use crate::state::AppState;

/// Extractor that requires a signed-in caller.
/// Rejects with a redirect to `/auth` when the cookie is missing, unknown or expired.
#[derive(Debug, Clone)]
pub struct RequireSession(pub Session);

impl FromRequestParts<AppState> for RequireSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(parts, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?;

        match state.backend.auth.current_session(token).await {
            Ok(Some(session)) => Ok(RequireSession(session)),
            Ok(None) => Err(AppError::Unauthorized),
            Err(e) => {
                // The session service being down is reported as signed out
                tracing::warn!("Session lookup failed: {}", e);
                Err(AppError::Unauthorized)
            }
        }
    }
}

/// Optional session extractor: `None` instead of a redirect.
pub struct MaybeSession(pub Option<Session>);

impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match RequireSession::from_request_parts(parts, state).await {
            Ok(RequireSession(session)) => Ok(MaybeSession(Some(session))),
            Err(_) => Ok(MaybeSession(None)),
        }
    }
}

pub fn cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}
