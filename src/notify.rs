//! One-shot notices shown on the next rendered page.
//!
//! A mutating request stores a [`Notice`] in a short-lived cookie and
//! redirects; the page that renders next shows it once and clears the
//! cookie. Nothing waits on a notice and nothing retries.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::extractors::cookie_value;

pub const FLASH_COOKIE: &str = "interior_flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self.level {
            Level::Success => "toast-success",
            Level::Error => "toast-error",
        }
    }

    /// Cookie values may not carry arbitrary text, so the notice travels as
    /// hex-encoded JSON.
    fn encode(&self) -> String {
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn cookie(&self) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=60",
            FLASH_COOKIE,
            self.encode()
        )
    }
}

pub fn clear_flash_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", FLASH_COOKIE)
}

/// The notice left by the previous request, if any.
#[derive(Debug, Clone, Default)]
pub struct Flash(pub Option<Notice>);

impl<S: Send + Sync> FromRequestParts<S> for Flash {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Flash(
            cookie_value(parts, FLASH_COOKIE).and_then(Notice::decode),
        ))
    }
}

/// A 303 redirect that optionally leaves a notice behind, plus any extra
/// cookies (session set/clear).
pub struct Redirect {
    to: String,
    notice: Option<Notice>,
    cookies: Vec<String>,
}

impl Redirect {
    pub fn to(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            notice: None,
            cookies: Vec::new(),
        }
    }

    pub fn notice(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }

    pub fn success(self, message: impl Into<String>) -> Self {
        self.notice(Notice::success(message))
    }

    pub fn error(self, message: impl Into<String>) -> Self {
        self.notice(Notice::error(message))
    }

    pub fn cookie(mut self, cookie: String) -> Self {
        self.cookies.push(cookie);
        self
    }
}

impl IntoResponse for Redirect {
    fn into_response(self) -> Response {
        let mut response = StatusCode::SEE_OTHER.into_response();
        let headers = response.headers_mut();

        match HeaderValue::from_str(&self.to) {
            Ok(location) => {
                headers.insert(header::LOCATION, location);
            }
            Err(_) => {
                tracing::error!("Invalid redirect target: {}", self.to);
                headers.insert(header::LOCATION, HeaderValue::from_static("/"));
            }
        }

        let cookies = self.notice.iter().map(Notice::cookie).chain(self.cookies);
        for cookie in cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn notice_survives_cookie_encoding() {
        let notice = Notice::error("new row violates row-level security policy; \"quoted\"");
        assert_eq!(Notice::decode(&notice.encode()), Some(notice));
    }

    #[test]
    fn garbage_cookie_decodes_to_none() {
        assert_eq!(Notice::decode("zz-not-hex"), None);
        assert_eq!(Notice::decode("abcd"), None);
    }

    #[test]
    fn redirect_sets_location_and_flash_cookie() {
        let response = Redirect::to("/project/p1")
            .success("Image uploaded successfully!")
            .into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/project/p1");
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("interior_flash="));
    }

    #[test]
    fn redirect_without_notice_sets_no_flash() {
        let response = Redirect::to("/").into_response();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn flash_extractor_reads_cookie() {
        let notice = Notice::success("Project created successfully!");
        let request = Request::builder()
            .header(
                header::COOKIE,
                format!("other=1; {}={}", FLASH_COOKIE, notice.encode()),
            )
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let Flash(found) = Flash::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(found, Some(notice));
    }
}
