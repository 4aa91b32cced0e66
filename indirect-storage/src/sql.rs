//! Relational backend on SQLite (sqlx).
//!
//! ## Database Schema
//!
//! - `artifacts`: one parent row per `(kind, environment, key)`
//! - `artifact_attributes`: `name -> value` child rows
//! - `artifact_tags`: tag child rows
//!
//! Saving an existing key updates the parent row in place and merges child
//! rows by name, so repeated saves never duplicate rows. Child rows absent
//! from the saved artifact are removed.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use indirect_core::{
    Artifact, ArtifactKind, Capabilities, CorrelationToken, IndirectError, IndirectResult,
    Request, StorageError, Timestamp,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::backend::Backend;
use crate::scoped_key::key_matcher;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        environment TEXT NOT NULL,
        key TEXT NOT NULL,
        artifact_environment TEXT,
        payload BLOB NOT NULL,
        correlation_token TEXT,
        version_pin TEXT,
        content_refs TEXT NOT NULL DEFAULT '[]',
        resolved_at TEXT NOT NULL,
        expires_at TEXT,
        UNIQUE (kind, environment, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artifact_attributes (
        artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (artifact_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artifact_tags (
        artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        PRIMARY KEY (artifact_id, name)
    )
    "#,
];

const ARTIFACT_COLUMNS: &str = "id, kind, key, artifact_environment, payload, correlation_token, \
     version_pin, content_refs, resolved_at, expires_at";

#[derive(Debug, Clone)]
pub struct SqlBackend {
    name: String,
    pool: SqlitePool,
}

fn format_time(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl SqlBackend {
    /// Connect to `url` (e.g. `sqlite://indirect.db` or `sqlite::memory:`)
    /// and create the schema if needed.
    pub async fn connect(name: impl Into<String>, url: &str) -> IndirectResult<Self> {
        let name = name.into();
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| db_error(&name, "parse url", e))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the pool's lifetime.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| db_error(&name, "connect", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| db_error(&name, "create schema", e))?;
        }
        tracing::info!(backend = %name, url = %url, "Relational backend ready");

        Ok(Self { name, pool })
    }

    fn err(&self, context: &str, e: sqlx::Error) -> IndirectError {
        db_error(&self.name, context, e)
    }

    fn corrupt(&self, key: &str, reason: impl std::fmt::Display) -> IndirectError {
        StorageError::Corrupt {
            backend: self.name.clone(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    fn parse_time(&self, key: &str, value: &str) -> IndirectResult<Timestamp> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| self.corrupt(key, e))
    }

    async fn artifact_id(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        request: &Request,
    ) -> IndirectResult<Option<i64>> {
        let row = sqlx::query("SELECT id FROM artifacts WHERE kind = ? AND environment = ? AND key = ?")
            .bind(request.kind().as_str())
            .bind(request.environment())
            .bind(request.key())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| self.err("select id", e))?;
        row.map(|r| r.try_get::<i64, _>("id"))
            .transpose()
            .map_err(|e| self.err("read id", e))
    }

    /// Rebuild an artifact from its parent row plus child rows.
    async fn load(&self, row: SqliteRow) -> IndirectResult<Artifact> {
        let get_err = |e| self.err("read row", e);
        let id: i64 = row.try_get("id").map_err(get_err)?;
        let kind_name: String = row.try_get("kind").map_err(get_err)?;
        let key: String = row.try_get("key").map_err(get_err)?;

        let kind = ArtifactKind::from_str(&kind_name).map_err(|e| self.corrupt(&key, e))?;
        let payload: Vec<u8> = row.try_get("payload").map_err(get_err)?;
        let resolved_at: String = row.try_get("resolved_at").map_err(get_err)?;

        let mut artifact = Artifact::new(kind, key.clone(), payload)
            .with_resolved_at(self.parse_time(&key, &resolved_at)?);

        if let Some(environment) = row
            .try_get::<Option<String>, _>("artifact_environment")
            .map_err(get_err)?
        {
            artifact = artifact.with_environment(environment);
        }
        if let Some(token) = row
            .try_get::<Option<String>, _>("correlation_token")
            .map_err(get_err)?
        {
            artifact = artifact.with_correlation_token(CorrelationToken::new(token))?;
        }
        if let Some(pin) = row
            .try_get::<Option<String>, _>("version_pin")
            .map_err(get_err)?
        {
            artifact = artifact.with_version_pin(pin)?;
        }
        if let Some(expires_at) = row
            .try_get::<Option<String>, _>("expires_at")
            .map_err(get_err)?
        {
            artifact = artifact.with_expires_at(self.parse_time(&key, &expires_at)?);
        }

        let refs: String = row.try_get("content_refs").map_err(get_err)?;
        let refs: Vec<String> = serde_json::from_str(&refs).map_err(|e| self.corrupt(&key, e))?;
        for path in refs {
            artifact = artifact.with_content_ref(path);
        }

        let attributes = sqlx::query(
            "SELECT name, value FROM artifact_attributes WHERE artifact_id = ? ORDER BY name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err("select attributes", e))?;
        for attribute in attributes {
            let name: String = attribute.try_get("name").map_err(get_err)?;
            let value: String = attribute.try_get("value").map_err(get_err)?;
            artifact = artifact.with_attribute(name, value);
        }

        let tags = sqlx::query("SELECT name FROM artifact_tags WHERE artifact_id = ? ORDER BY name")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.err("select tags", e))?;
        for tag in tags {
            let name: String = tag.try_get("name").map_err(get_err)?;
            artifact = artifact.with_tag(name);
        }

        Ok(artifact)
    }

    async fn merge_attributes(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        attributes: &BTreeMap<String, String>,
    ) -> IndirectResult<()> {
        for (name, value) in attributes {
            sqlx::query(
                "INSERT INTO artifact_attributes (artifact_id, name, value) VALUES (?, ?, ?) \
                 ON CONFLICT (artifact_id, name) DO UPDATE SET value = excluded.value",
            )
            .bind(id)
            .bind(name)
            .bind(value)
            .execute(&mut **tx)
            .await
            .map_err(|e| self.err("upsert attribute", e))?;
        }

        let existing = sqlx::query("SELECT name FROM artifact_attributes WHERE artifact_id = ?")
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| self.err("select attributes", e))?;
        for row in existing {
            let name: String = row.try_get("name").map_err(|e| self.err("read row", e))?;
            if !attributes.contains_key(&name) {
                sqlx::query("DELETE FROM artifact_attributes WHERE artifact_id = ? AND name = ?")
                    .bind(id)
                    .bind(&name)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| self.err("delete attribute", e))?;
            }
        }
        Ok(())
    }

    async fn merge_tags(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        tags: &BTreeSet<String>,
    ) -> IndirectResult<()> {
        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO artifact_tags (artifact_id, name) VALUES (?, ?)")
                .bind(id)
                .bind(tag)
                .execute(&mut **tx)
                .await
                .map_err(|e| self.err("insert tag", e))?;
        }

        let existing = sqlx::query("SELECT name FROM artifact_tags WHERE artifact_id = ?")
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| self.err("select tags", e))?;
        for row in existing {
            let name: String = row.try_get("name").map_err(|e| self.err("read row", e))?;
            if !tags.contains(&name) {
                sqlx::query("DELETE FROM artifact_tags WHERE artifact_id = ? AND name = ?")
                    .bind(id)
                    .bind(&name)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| self.err("delete tag", e))?;
            }
        }
        Ok(())
    }

    /// Number of child rows stored for `request`'s artifact.
    pub async fn child_row_count(&self, request: &Request) -> IndirectResult<i64> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM artifact_attributes WHERE artifact_id = a.id) + \
               (SELECT COUNT(*) FROM artifact_tags WHERE artifact_id = a.id) AS children \
             FROM artifacts a WHERE kind = ? AND environment = ? AND key = ?",
        )
        .bind(request.kind().as_str())
        .bind(request.environment())
        .bind(request.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.err("count children", e))?;
        match row {
            Some(row) => row.try_get("children").map_err(|e| self.err("read row", e)),
            None => Ok(0),
        }
    }
}

fn db_error(backend: &str, context: &str, e: impl std::fmt::Display) -> IndirectError {
    StorageError::Database {
        backend: backend.to_string(),
        reason: format!("{}: {}", context, e),
    }
    .into()
}

/// Translate a glob into a LIKE pattern. `[...]` classes widen to `%`; the
/// glob matcher filters the rows afterwards.
fn like_pattern(glob: &str) -> String {
    let mut like = String::with_capacity(glob.len());
    let mut in_class = false;
    for c in glob.chars() {
        match c {
            '[' if !in_class => {
                in_class = true;
                like.push('%');
            }
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '*' => like.push('%'),
            '?' => like.push('_'),
            '%' | '_' | '\\' => {
                like.push('\\');
                like.push(c);
            }
            _ => like.push(c),
        }
    }
    like
}

#[async_trait]
impl Backend for SqlBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let query = format!(
            "SELECT {} FROM artifacts WHERE kind = ? AND environment = ? AND key = ?",
            ARTIFACT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(request.kind().as_str())
            .bind(request.environment())
            .bind(request.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err("select artifact", e))?;

        match row {
            Some(row) => self.load(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let matcher = key_matcher(request.key())?;
        let query = format!(
            "SELECT {} FROM artifacts WHERE kind = ? AND environment = ? AND key LIKE ? ESCAPE '\\' \
             ORDER BY key",
            ARTIFACT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(request.kind().as_str())
            .bind(request.environment())
            .bind(like_pattern(request.key()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.err("search artifacts", e))?;

        let mut found = Vec::new();
        for row in rows {
            let key: String = row.try_get("key").map_err(|e| self.err("read row", e))?;
            if matcher.is_match(&key) {
                found.push(self.load(row).await?);
            }
        }
        Ok(found)
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let content_refs = serde_json::to_string(artifact.content_refs())
            .map_err(|e| self.corrupt(request.key(), e))?;

        let mut tx = self.pool.begin().await.map_err(|e| self.err("begin", e))?;

        sqlx::query(
            "INSERT INTO artifacts (kind, environment, key, artifact_environment, payload, \
               correlation_token, version_pin, content_refs, resolved_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (kind, environment, key) DO UPDATE SET \
               artifact_environment = excluded.artifact_environment, \
               payload = excluded.payload, \
               correlation_token = excluded.correlation_token, \
               version_pin = excluded.version_pin, \
               content_refs = excluded.content_refs, \
               resolved_at = excluded.resolved_at, \
               expires_at = excluded.expires_at",
        )
        .bind(request.kind().as_str())
        .bind(request.environment())
        .bind(request.key())
        .bind(artifact.environment())
        .bind(artifact.payload().as_bytes())
        .bind(artifact.correlation_token().map(|t| t.as_str()))
        .bind(artifact.version_pin())
        .bind(content_refs)
        .bind(format_time(artifact.resolved_at()))
        .bind(artifact.expires_at().map(format_time))
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err("upsert artifact", e))?;

        let id = self
            .artifact_id(&mut tx, request)
            .await?
            .ok_or_else(|| self.corrupt(request.key(), "row missing after upsert"))?;

        self.merge_attributes(&mut tx, id, artifact.attributes()).await?;
        self.merge_tags(&mut tx, id, artifact.tags()).await?;

        tx.commit().await.map_err(|e| self.err("commit", e))?;
        tracing::debug!(backend = %self.name, artifact = %artifact.description(), "Saved artifact row");
        Ok(())
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| self.err("begin", e))?;

        if let Some(id) = self.artifact_id(&mut tx, request).await? {
            for statement in [
                "DELETE FROM artifact_attributes WHERE artifact_id = ?",
                "DELETE FROM artifact_tags WHERE artifact_id = ?",
                "DELETE FROM artifacts WHERE id = ?",
            ] {
                sqlx::query(statement)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| self.err("delete artifact", e))?;
            }
        }

        tx.commit().await.map_err(|e| self.err("commit", e))
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let row = sqlx::query("SELECT 1 FROM artifacts WHERE kind = ? AND environment = ? AND key = ?")
            .bind(request.kind().as_str())
            .bind(request.environment())
            .bind(request.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err("exists", e))?;
        Ok(row.is_some())
    }
}
