//! Hosted provider: a Supabase project reached over HTTPS.
//!
//! Records go through PostgREST (`/rest/v1`), blobs through Storage
//! (`/storage/v1`) and accounts through GoTrue (`/auth/v1`). Every call
//! carries the project's anon key plus the caller's access token, so the
//! hosted row policies decide what the caller may see.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{
    AuthUser, BackendError, BackendResult, BlobStore, Query, RecordStore, Session,
    SessionProvider, SignUpOutcome, Table,
};

#[derive(Debug, Clone)]
pub struct SupabaseBackend {
    http: reqwest::Client,
    base: String,
    anon_key: String,
    bucket: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

impl SupabaseBackend {
    pub fn new(url: &str, anon_key: &str, bucket: &str) -> BackendResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| BackendError::remote(format!("Invalid Supabase URL {}: {}", url, e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base: parsed.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn rest_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base, endpoint)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    /// Attach the anon key and the bearer token (the caller's, or the anon
    /// key itself for unauthenticated auth calls).
    fn authorized(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(self.anon_key.as_str()))
    }
}

/// PostgREST query-string parameters for a select.
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for filter in &query.filters {
        params.push((filter.column.clone(), format!("eq.{}", filter.value)));
    }
    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    params
}

/// Pull the human-readable message out of an error body. The three hosted
/// services each use their own field name for it.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(message) = fields.get(key).and_then(Value::as_str) {
                if !message.is_empty() {
                    return message.to_string();
                }
            }
        }
    }
    let body = body.trim();
    if body.is_empty() || body.len() > 200 {
        format!("Request failed with status {}", status)
    } else {
        body.to_string()
    }
}

async fn check(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    tracing::warn!(status = %status, "Backend request failed: {}", message);
    Err(BackendError::Remote(message))
}

#[async_trait]
impl RecordStore for SupabaseBackend {
    async fn insert(&self, session: &Session, table: Table, record: Value) -> BackendResult<Value> {
        let request = self
            .http
            .post(self.rest_url(table))
            .header("Prefer", "return=representation")
            .json(&record);
        let response = check(self.authorized(request, Some(session.access_token.as_str())).send().await?).await?;

        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(BackendError::remote(format!(
                "insert into {} returned no row",
                table
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn select(&self, session: &Session, table: Table, query: &Query) -> BackendResult<Vec<Value>> {
        let request = self.http.get(self.rest_url(table)).query(&query_params(query));
        let response = check(self.authorized(request, Some(session.access_token.as_str())).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn update(&self, session: &Session, table: Table, id: &str, patch: Value) -> BackendResult<()> {
        let request = self
            .http
            .patch(self.rest_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&patch);
        check(self.authorized(request, Some(session.access_token.as_str())).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for SupabaseBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        session: &Session,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> BackendResult<()> {
        let request = self
            .http
            .post(self.object_url(path))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(data);
        check(self.authorized(request, Some(session.access_token.as_str())).send().await?).await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn download(&self, path: &str) -> BackendResult<Option<Bytes>> {
        let response = self.http.get(self.public_url(path)).send().await?;
        // Storage answers a missing object with 400 as often as with 404
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST) {
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.bytes().await?))
    }
}

#[async_trait]
impl SessionProvider for SupabaseBackend {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome> {
        let request = self
            .http
            .post(self.auth_url("signup"))
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response = check(self.authorized(request, None).send().await?).await?;
        let body: Value = response.json().await?;

        // A session in the reply means the project skips email confirmation
        if body.get("access_token").is_some() {
            Ok(SignUpOutcome::Active)
        } else {
            Ok(SignUpOutcome::ConfirmationRequired)
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response = check(self.authorized(request, None).send().await?).await?;
        let token: TokenResponse = response.json().await?;

        tracing::info!(user_id = %token.user.id, "Signed in");
        Ok(Session {
            access_token: token.access_token,
            user: token.user,
        })
    }

    async fn sign_out(&self, session: &Session) -> BackendResult<()> {
        let request = self.http.post(self.auth_url("logout"));
        check(self.authorized(request, Some(session.access_token.as_str())).send().await?).await?;
        Ok(())
    }

    async fn current_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        let request = self.http.get(self.auth_url("user"));
        let response = self.authorized(request, Some(access_token)).send().await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        let user: AuthUser = check(response).await?.json().await?;
        Ok(Some(Session {
            access_token: access_token.to_string(),
            user,
        }))
    }
}
