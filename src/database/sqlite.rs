//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension};
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{Identity, NewIdentity};

/// Columns selected for every identity query, in `row_to_identity` order
const IDENTITY_COLUMNS: &str = "id, name, secret_prefix, secret_hash, quota_per_minute, \
                                enabled, created_at, last_used_at";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Run an UPDATE against a live identity, failing with NotFound if no row matched
    async fn update_live(
        &self,
        sql: &'static str,
        params: Vec<rusqlite::types::Value>,
    ) -> Result<(), DbError> {
        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(sql, rusqlite::params_from_iter(params))?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Identity operations
    // =========================================================================

    async fn create_identity(&self, identity: &NewIdentity) -> Result<i64, DbError> {
        let name = identity.name.clone();
        let secret_prefix = identity.secret_prefix.clone();
        let secret_hash = identity.secret_hash.clone();
        let quota = identity.quota_per_minute.max(0);
        let created_at = Utc::now().to_rfc3339();

        let result = self
            .conn
            .call(move |conn| {
                let inserted = conn
                    .execute(
                        r#"
                        INSERT INTO api_identities
                        (name, secret_prefix, secret_hash, quota_per_minute, enabled, created_at)
                        VALUES (?1, ?2, ?3, ?4, 1, ?5)
                        "#,
                        rusqlite::params![name, secret_prefix, secret_hash, quota, created_at],
                    )
                    .map(|_| conn.last_insert_rowid());
                Ok(inserted)
            })
            .await?;

        result.map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                DbError::ConstraintViolation(format!("identity name '{}'", identity.name))
            }
            _ => DbError::Sqlite(e),
        })
    }

    async fn get_identity(&self, id: i64) -> Result<Option<Identity>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM api_identities WHERE id = ?1 AND deleted_at IS NULL",
                    IDENTITY_COLUMNS
                );
                let identity = conn
                    .query_row(&sql, [id], row_to_identity)
                    .optional()?;
                Ok(identity)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_enabled_by_prefix(&self, prefix: &str) -> Result<Option<Identity>, DbError> {
        let prefix = prefix.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    r#"
                    SELECT {} FROM api_identities
                    WHERE secret_prefix = ?1 AND enabled = 1 AND deleted_at IS NULL
                    ORDER BY id ASC
                    LIMIT 1
                    "#,
                    IDENTITY_COLUMNS
                );
                let identity = conn
                    .query_row(&sql, [&prefix], row_to_identity)
                    .optional()?;
                Ok(identity)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, DbError> {
        self.conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {} FROM api_identities WHERE deleted_at IS NULL ORDER BY id ASC",
                    IDENTITY_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let identities = stmt
                    .query_map([], row_to_identity)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(identities)
            })
            .await
            .map_err(Into::into)
    }

    async fn set_identity_enabled(&self, id: i64, enabled: bool) -> Result<(), DbError> {
        self.update_live(
            "UPDATE api_identities SET enabled = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            vec![(enabled as i64).into(), id.into()],
        )
        .await
    }

    async fn update_identity_quota(&self, id: i64, quota_per_minute: i64) -> Result<(), DbError> {
        self.update_live(
            "UPDATE api_identities SET quota_per_minute = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            vec![quota_per_minute.max(0).into(), id.into()],
        )
        .await
    }

    async fn rotate_identity_secret(
        &self,
        id: i64,
        secret_prefix: &str,
        secret_hash: &str,
    ) -> Result<(), DbError> {
        self.update_live(
            r#"
            UPDATE api_identities SET secret_prefix = ?1, secret_hash = ?2
            WHERE id = ?3 AND deleted_at IS NULL
            "#,
            vec![
                secret_prefix.to_string().into(),
                secret_hash.to_string().into(),
                id.into(),
            ],
        )
        .await
    }

    async fn delete_identity(&self, id: i64) -> Result<(), DbError> {
        self.update_live(
            "UPDATE api_identities SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            vec![Utc::now().to_rfc3339().into(), id.into()],
        )
        .await
    }

    async fn touch_identity_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        let at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE api_identities SET last_used_at = ?1 WHERE id = ?2",
                    rusqlite::params![at, id],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn count_identities(&self) -> Result<u64, DbError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM api_identities WHERE deleted_at IS NULL",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Settings operations
    // =========================================================================

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let key = key.to_string();

        self.conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM settings WHERE key = ?1", [&key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Into::into)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let key = key.to_string();
        let value = value.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO settings (key, value) VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                    rusqlite::params![key, value],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        secret_prefix: row.get(2)?,
        secret_hash: row.get(3)?,
        quota_per_minute: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        created_at: parse_datetime(row.get::<_, Option<String>>(6)?).unwrap_or_else(Utc::now),
        last_used_at: parse_datetime(row.get::<_, Option<String>>(7)?),
    })
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
