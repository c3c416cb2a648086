//! Local provider: records, accounts and sessions in the SQLite database.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::{Map, Value};

use super::{
    AuthUser, BackendError, BackendResult, Query, RecordStore, Session, SessionProvider,
    SignUpOutcome, Table,
};
use crate::state::DbPool;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Text,
    Integer,
    Real,
    /// Stored as JSON text, exchanged as a JSON value.
    Json,
}

struct Column {
    name: &'static str,
    kind: Kind,
}

const fn col(name: &'static str, kind: Kind) -> Column {
    Column { name, kind }
}

const PROJECT_COLUMNS: &[Column] = &[
    col("id", Kind::Text),
    col("name", Kind::Text),
    col("description", Kind::Text),
    col("created_at", Kind::Text),
    col("user_id", Kind::Text),
    col("floors", Kind::Integer),
];

const IMAGE_COLUMNS: &[Column] = &[
    col("id", Kind::Text),
    col("project_id", Kind::Text),
    col("url", Kind::Text),
    col("created_at", Kind::Text),
];

const PIN_COLUMNS: &[Column] = &[
    col("id", Kind::Text),
    col("image_id", Kind::Text),
    col("x", Kind::Real),
    col("y", Kind::Real),
    col("metadata", Kind::Json),
    col("created_at", Kind::Text),
];

fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Projects => PROJECT_COLUMNS,
        Table::Images => IMAGE_COLUMNS,
        Table::Pins => PIN_COLUMNS,
    }
}

fn column(table: Table, name: &str) -> BackendResult<&'static Column> {
    columns(table)
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| {
            BackendError::remote(format!(
                "Could not find the '{}' column of '{}'",
                name, table
            ))
        })
}

fn json_to_sql(table: Table, column: &Column, value: &Value) -> BackendResult<SqlValue> {
    let mismatch = || {
        BackendError::remote(format!(
            "invalid value for column '{}' of '{}': {}",
            column.name, table, value
        ))
    };

    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match column.kind {
        Kind::Text => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        Kind::Integer => value.as_i64().map(SqlValue::Integer).ok_or_else(mismatch),
        Kind::Real => value.as_f64().map(SqlValue::Real).ok_or_else(mismatch),
        Kind::Json => Ok(SqlValue::Text(serde_json::to_string(value)?)),
    }
}

fn sql_to_json(column: &Column, value: SqlValue) -> BackendResult<Value> {
    Ok(match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Value::from(f),
        SqlValue::Text(text) if column.kind == Kind::Json => serde_json::from_str(&text)?,
        SqlValue::Text(text) => Value::String(text),
        SqlValue::Blob(_) => Value::Null,
    })
}

fn as_object(table: Table, value: Value) -> BackendResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::remote(format!(
            "expected a JSON object for '{}', got {}",
            table, other
        ))),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Row filter limiting `table` to what the session's user owns. Images
/// belong to the owner of their project, pins to the owner of their image.
fn owner_clause(table: Table, arg: usize) -> String {
    match table {
        Table::Projects => format!("user_id = ?{}", arg),
        Table::Images => format!(
            "project_id IN (SELECT id FROM projects WHERE user_id = ?{})",
            arg
        ),
        Table::Pins => format!(
            "image_id IN (SELECT images.id FROM images \
             JOIN projects ON projects.id = images.project_id \
             WHERE projects.user_id = ?{})",
            arg
        ),
    }
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Record store and session provider backed by the local database.
///
/// Projects are owned by the signed-in user: inserts stamp `user_id` from
/// the session and selects only see the caller's projects.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: DbPool,
    session_hours: u64,
    hash_cost: u32,
}

impl SqliteBackend {
    pub fn new(pool: DbPool, session_hours: u64) -> Self {
        Self {
            pool,
            session_hours,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost. Low costs are only meant for tests.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn insert_record(&self, session: &Session, table: Table, record: Value) -> BackendResult<Value> {
        let mut record = as_object(table, record)?;

        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        record.insert("id".into(), Value::String(id.clone()));
        record.insert("created_at".into(), Value::String(timestamp()));
        if table == Table::Projects {
            record.insert("user_id".into(), Value::String(session.user.id.clone()));
        }
        self.check_parent_owned(session, table, &record)?;

        let mut names = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (name, value) in &record {
            let column = column(table, name)?;
            names.push(column.name);
            values.push(json_to_sql(table, column, value)?);
        }

        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        );

        let conn = self.pool.get()?;
        conn.execute(&sql, params_from_iter(values))?;
        drop(conn);

        tracing::debug!(table = %table, id = %id, "Inserted record");

        let query = Query::new().eq("id", id);
        self.select_records(session, table, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::remote(format!("inserted row missing from '{}'", table)))
    }

    /// Images may only be added to the caller's projects, pins only to
    /// images of those projects.
    fn check_parent_owned(&self, session: &Session, table: Table, record: &Map<String, Value>) -> BackendResult<()> {
        let (parent, key) = match table {
            Table::Projects => return Ok(()),
            Table::Images => (Table::Projects, "project_id"),
            Table::Pins => (Table::Images, "image_id"),
        };
        let parent_id = record.get(key).and_then(Value::as_str).unwrap_or_default();
        let owned = !self
            .select_records(session, parent, &Query::new().eq("id", parent_id))?
            .is_empty();
        if !owned {
            tracing::warn!(table = %table, parent_id, user_id = %session.user.id, "Insert under a foreign parent refused");
            return Err(BackendError::remote(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            )));
        }
        Ok(())
    }

    fn select_records(&self, session: &Session, table: Table, query: &Query) -> BackendResult<Vec<Value>> {
        let cols = columns(table);
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        for filter in &query.filters {
            let column = column(table, &filter.column)?;
            args.push(SqlValue::Text(filter.value.clone()));
            clauses.push(format!("{} = ?{}", column.name, args.len()));
        }
        args.push(SqlValue::Text(session.user.id.clone()));
        clauses.push(owner_clause(table, args.len()));

        let mut sql = format!(
            "SELECT {} FROM {}",
            cols.iter().map(|c| c.name).collect::<Vec<_>>().join(", "),
            table
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(order) = &query.order {
            let column = column(table, &order.column)?;
            // rowid breaks ties between rows created within the same microsecond
            let direction = if order.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(
                " ORDER BY {} {}, rowid {}",
                column.name, direction, direction
            ));
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<Vec<SqlValue>> = stmt
            .query_map(params_from_iter(args), |row| {
                (0..cols.len()).map(|i| row.get::<_, SqlValue>(i)).collect()
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|row| {
                let mut object = Map::new();
                for (column, value) in cols.iter().zip(row) {
                    object.insert(column.name.to_string(), sql_to_json(column, value)?);
                }
                Ok(Value::Object(object))
            })
            .collect()
    }

    fn update_record(&self, session: &Session, table: Table, id: &str, patch: Value) -> BackendResult<()> {
        let patch = as_object(table, patch)?;
        if patch.is_empty() {
            return Ok(());
        }

        let mut sets = Vec::new();
        let mut args = Vec::new();
        for (name, value) in &patch {
            let column = column(table, name)?;
            if column.name == "id" || column.name == "created_at" {
                return Err(BackendError::remote(format!(
                    "column '{}' of '{}' cannot be updated",
                    column.name, table
                )));
            }
            args.push(json_to_sql(table, column, value)?);
            sets.push(format!("{} = ?{}", column.name, args.len()));
        }

        args.push(SqlValue::Text(id.to_string()));
        let mut sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            sets.join(", "),
            args.len()
        );
        args.push(SqlValue::Text(session.user.id.clone()));
        sql.push_str(&format!(" AND {}", owner_clause(table, args.len())));

        let conn = self.pool.get()?;
        let changed = conn.execute(&sql, params_from_iter(args))?;
        // Like a filtered update on a hosted table, matching nothing is not an error
        tracing::debug!(table = %table, id, changed, "Updated record");
        Ok(())
    }

    fn create_account(&self, email: &str, password: &str) -> BackendResult<String> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(BackendError::remote(
                "Unable to validate email address: invalid format",
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::remote(format!(
                "Password should be at least {} characters.",
                MIN_PASSWORD_LEN
            )));
        }

        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(BackendError::remote("User already registered"));
        }

        let hash = bcrypt::hash(password, self.hash_cost)
            .map_err(|e| BackendError::remote(e.to_string()))?;
        let id = uuid::Uuid::now_v7().to_string();
        let confirmation = generate_token();

        conn.execute(
            "INSERT INTO users (id, email, password_hash, confirmation_token) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, hash, confirmation],
        )?;

        tracing::info!(
            email = %email,
            "Account created; confirm it at /auth/confirm?token={}",
            confirmation
        );
        Ok(confirmation)
    }

    fn create_session(&self, email: &str, password: &str) -> BackendResult<Session> {
        let email = email.trim().to_lowercase();
        let conn = self.pool.get()?;

        let account: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, password_hash, confirmed_at FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((user_id, hash, confirmed_at)) = account else {
            return Err(BackendError::remote("Invalid login credentials"));
        };
        let valid = bcrypt::verify(password, &hash).map_err(|e| BackendError::remote(e.to_string()))?;
        if !valid {
            return Err(BackendError::remote("Invalid login credentials"));
        }
        if confirmed_at.is_none() {
            return Err(BackendError::remote("Email not confirmed"));
        }

        let token = generate_token();
        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
            params![
                uuid::Uuid::now_v7().to_string(),
                user_id,
                token,
                format!("+{} hours", self.session_hours)
            ],
        )?;

        tracing::info!(user_id = %user_id, "Signed in");
        Ok(Session {
            access_token: token,
            user: AuthUser {
                id: user_id,
                email: Some(email),
            },
        })
    }

    fn lookup_session(&self, token: &str) -> BackendResult<Option<Session>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT u.id, u.email FROM sessions s \
                 JOIN users u ON u.id = s.user_id \
                 WHERE s.token = ?1 AND s.expires_at > datetime('now')",
                params![token],
                |row| {
                    Ok(AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(user.map(|user| Session {
            access_token: token.to_string(),
            user,
        }))
    }

    fn delete_session(&self, token: &str) -> BackendResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }

    fn confirm_account(&self, token: &str) -> BackendResult<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE users SET confirmed_at = datetime('now'), confirmation_token = NULL \
             WHERE confirmation_token = ?1",
            params![token],
        )?;
        if changed == 0 {
            return Err(BackendError::remote("Token has expired or is invalid"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteBackend {
    async fn insert(&self, session: &Session, table: Table, record: Value) -> BackendResult<Value> {
        self.insert_record(session, table, record)
    }

    async fn select(&self, session: &Session, table: Table, query: &Query) -> BackendResult<Vec<Value>> {
        self.select_records(session, table, query)
    }

    async fn update(&self, session: &Session, table: Table, id: &str, patch: Value) -> BackendResult<()> {
        self.update_record(session, table, id, patch)
    }
}

#[async_trait]
impl SessionProvider for SqliteBackend {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome> {
        self.create_account(email, password)?;
        Ok(SignUpOutcome::ConfirmationRequired)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.create_session(email, password)
    }

    async fn sign_out(&self, session: &Session) -> BackendResult<()> {
        self.delete_session(&session.access_token)
    }

    async fn current_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        self.lookup_session(access_token)
    }

    async fn confirm_email(&self, token: &str) -> BackendResult<()> {
        self.confirm_account(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn backend() -> (tempfile::TempDir, SqliteBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (tmp, SqliteBackend::new(pool, 1).with_hash_cost(4))
    }

    async fn signed_in(backend: &SqliteBackend, email: &str) -> Session {
        let token = backend.create_account(email, "secret-pass").unwrap();
        backend.confirm_email(&token).await.unwrap();
        backend.sign_in(email, "secret-pass").await.unwrap()
    }

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn insert_returns_generated_id_and_timestamp() {
        let (_tmp, backend) = backend();
        let session = signed_in(&backend, "a@example.com").await;

        let stored = backend
            .insert(&session, Table::Projects, json!({ "name": "Loft", "floors": 2 }))
            .await
            .unwrap();

        assert!(stored["id"].as_str().is_some());
        assert!(stored["created_at"].as_str().is_some());
        assert_eq!(stored["user_id"], json!(session.user.id));
        assert_eq!(stored["floors"], json!(2));
        assert_eq!(stored["description"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_column_is_rejected() {
        let (_tmp, backend) = backend();
        let session = signed_in(&backend, "a@example.com").await;

        let err = backend
            .insert(&session, Table::Projects, json!({ "name": "Loft", "colour": "red" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'colour'"));
    }

    #[tokio::test]
    async fn select_orders_newest_first_and_scopes_projects_to_owner() {
        let (_tmp, backend) = backend();
        let alice = signed_in(&backend, "alice@example.com").await;
        let bob = signed_in(&backend, "bob@example.com").await;

        for name in ["first", "second", "third"] {
            backend
                .insert(&alice, Table::Projects, json!({ "name": name }))
                .await
                .unwrap();
        }
        backend
            .insert(&bob, Table::Projects, json!({ "name": "bobs" }))
            .await
            .unwrap();

        let rows = backend
            .select(&alice, Table::Projects, &Query::new().newest_first())
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().filter_map(|r| r["name"].as_str()).collect();
        assert_eq!(names, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn pin_metadata_round_trips_as_json_and_updates_whole_mapping() {
        let (_tmp, backend) = backend();
        let session = signed_in(&backend, "a@example.com").await;
        let project = backend
            .insert(&session, Table::Projects, json!({ "name": "Loft" }))
            .await
            .unwrap();
        let image = backend
            .insert(
                &session,
                Table::Images,
                json!({ "project_id": project["id"], "url": "/storage/x.jpg" }),
            )
            .await
            .unwrap();
        let pin = backend
            .insert(
                &session,
                Table::Pins,
                json!({ "image_id": image["id"], "x": 0.5, "y": 0.25, "metadata": {} }),
            )
            .await
            .unwrap();
        let pin_id = pin["id"].as_str().unwrap();

        backend
            .update(
                &session,
                Table::Pins,
                pin_id,
                json!({ "metadata": { "material": "oak" } }),
            )
            .await
            .unwrap();

        let rows = backend
            .select(&session, Table::Pins, &Query::new().eq("id", pin_id))
            .await
            .unwrap();
        assert_eq!(rows[0]["metadata"], json!({ "material": "oak" }));
        assert_eq!(rows[0]["x"], json!(0.5));
    }

    #[tokio::test]
    async fn images_and_pins_are_scoped_to_the_project_owner() {
        let (_tmp, backend) = backend();
        let alice = signed_in(&backend, "alice@example.com").await;
        let bob = signed_in(&backend, "bob@example.com").await;
        let project = backend
            .insert(&alice, Table::Projects, json!({ "name": "Loft" }))
            .await
            .unwrap();
        let image = backend
            .insert(
                &alice,
                Table::Images,
                json!({ "project_id": project["id"], "url": "/storage/x.jpg" }),
            )
            .await
            .unwrap();
        let pin = backend
            .insert(
                &alice,
                Table::Pins,
                json!({ "image_id": image["id"], "x": 0.5, "y": 0.5, "metadata": {} }),
            )
            .await
            .unwrap();
        let image_id = image["id"].as_str().unwrap();
        let pin_id = pin["id"].as_str().unwrap();

        let by_id = Query::new().eq("id", image_id);
        assert!(backend.select(&bob, Table::Images, &by_id).await.unwrap().is_empty());
        let pins_of_image = Query::new().eq("image_id", image_id);
        assert!(backend
            .select(&bob, Table::Pins, &pins_of_image)
            .await
            .unwrap()
            .is_empty());

        backend
            .update(&bob, Table::Pins, pin_id, json!({ "metadata": { "paint": "black" } }))
            .await
            .unwrap();
        let err = backend
            .insert(
                &bob,
                Table::Pins,
                json!({ "image_id": image_id, "x": 0.1, "y": 0.1, "metadata": {} }),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("row-level security"));
        let err = backend
            .insert(
                &bob,
                Table::Images,
                json!({ "project_id": project["id"], "url": "/storage/y.jpg" }),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("row-level security"));

        let rows = backend.select(&alice, Table::Pins, &pins_of_image).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["metadata"], json!({}));
    }

    #[tokio::test]
    async fn sign_in_requires_confirmation() {
        let (_tmp, backend) = backend();
        let outcome = backend.sign_up("new@example.com", "secret-pass").await.unwrap();
        assert_eq!(outcome, SignUpOutcome::ConfirmationRequired);

        let err = backend.sign_in("new@example.com", "secret-pass").await.unwrap_err();
        assert_eq!(err.to_string(), "Email not confirmed");
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let (_tmp, backend) = backend();
        signed_in(&backend, "a@example.com").await;

        let err = backend.sign_in("a@example.com", "nope-nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let (_tmp, backend) = backend();
        backend.sign_up("a@example.com", "secret-pass").await.unwrap();
        let err = backend.sign_up("A@example.com", "secret-pass").await.unwrap_err();
        assert_eq!(err.to_string(), "User already registered");
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (_tmp, backend) = backend();
        let err = backend.sign_up("a@example.com", "12345").await.unwrap_err();
        assert_eq!(err.to_string(), "Password should be at least 6 characters.");
    }

    #[tokio::test]
    async fn sign_out_invalidates_session() {
        let (_tmp, backend) = backend();
        let session = signed_in(&backend, "a@example.com").await;

        assert!(backend
            .current_session(&session.access_token)
            .await
            .unwrap()
            .is_some());
        backend.sign_out(&session).await.unwrap();
        assert!(backend
            .current_session(&session.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn confirm_with_unknown_token_fails() {
        let (_tmp, backend) = backend();
        let err = backend.confirm_email("bogus").await.unwrap_err();
        assert_eq!(err.to_string(), "Token has expired or is invalid");
    }
}
