//! Narrow interfaces over the services that hold all persistent state.
//!
//! Components never talk to a provider directly: they receive a
//! [`RecordStore`], a [`BlobStore`] or a [`SessionProvider`] and the caller's
//! [`Session`], so the local SQLite provider and the hosted provider are
//! interchangeable.

pub mod fs_blob;
pub mod sqlite;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::fs_blob::FsBlobStore;
pub use self::sqlite::SqliteBackend;
pub use self::supabase::SupabaseBackend;

/// Bucket that holds uploaded room photos.
pub const IMAGE_BUCKET: &str = "interior-images";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A message produced by the service itself, shown to the user verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Pool(#[from] r2d2::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    pub fn remote(message: impl Into<String>) -> Self {
        BackendError::Remote(message.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Logical tables of the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Projects,
    Images,
    Pins,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Projects => "projects",
            Table::Images => "images",
            Table::Pins => "pins",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Column equality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// A select: equality filters joined with AND, plus an optional ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn newest_first(self) -> Self {
        self.order_by("created_at", true)
    }

    pub fn oldest_first(self) -> Self {
        self.order_by("created_at", false)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// An authenticated caller. Passed explicitly into every backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The account exists but must be confirmed by email before signing in.
    ConfirmationRequired,
    /// The service confirmed the account immediately.
    Active,
}

/// Table-like structured storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one record and return it as stored, including the generated
    /// `id` and `created_at`.
    async fn insert(&self, session: &Session, table: Table, record: Value) -> BackendResult<Value>;

    async fn select(&self, session: &Session, table: Table, query: &Query)
        -> BackendResult<Vec<Value>>;

    /// Overwrite the given top-level fields of the record with this id.
    async fn update(&self, session: &Session, table: Table, id: &str, patch: Value)
        -> BackendResult<()>;
}

/// Binary object storage for a single bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn upload(
        &self,
        session: &Session,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> BackendResult<()>;

    /// Publicly retrievable URL for a stored path. Does not check existence.
    fn public_url(&self, path: &str) -> String;

    async fn download(&self, path: &str) -> BackendResult<Option<Bytes>>;
}

/// Account and session service.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_out(&self, session: &Session) -> BackendResult<()>;

    /// Resolve an access token into a live session, `None` when the token is
    /// unknown or expired.
    async fn current_session(&self, access_token: &str) -> BackendResult<Option<Session>>;

    async fn confirm_email(&self, _token: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported("email confirmation"))
    }
}

/// The three capabilities the application runs against.
#[derive(Clone)]
pub struct Backend {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth: Arc<dyn SessionProvider>,
}

impl Backend {
    pub fn local(db: SqliteBackend, blobs: FsBlobStore) -> Self {
        let db = Arc::new(db);
        Self {
            records: db.clone(),
            blobs: Arc::new(blobs),
            auth: db,
        }
    }

    pub fn supabase(client: SupabaseBackend) -> Self {
        let client = Arc::new(client);
        Self {
            records: client.clone(),
            blobs: client.clone(),
            auth: client,
        }
    }
}
